//! Error types for the reactor core.
//!
//! Strongly-typed errors per layer: channel faults (resolution,
//! registration, dispatch I/O) and teardown faults (unbind hooks).
//!
//! Only [`ChannelError::AddressResolution`] crosses the public boundary
//! synchronously (from `connect`). Every other channel fault is absorbed
//! into the deferred-close machinery so one misbehaving connection can
//! never terminate the reactor cycle.

use std::io;

use thiserror::Error;

/// Errors produced at the channel boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Peer address could not be resolved.
    ///
    /// The only fault surfaced synchronously to the caller of `connect`.
    #[error("unable to resolve address: {address}")]
    AddressResolution {
        /// Address that failed to resolve
        address: String,
    },

    /// Channel descriptor was invalidated between creation and selector
    /// registration. Deferred into a close request, never raised.
    #[error("channel closed before registration")]
    Closed,

    /// I/O failure during ready-event dispatch. Deferred into a close
    /// request; the dispatch loop continues with remaining connections.
    #[error("channel i/o failure: {0}")]
    Io(String),
}

impl ChannelError {
    /// Returns true if this fault is absorbed into the deferred-close
    /// machinery rather than surfaced to the construction API caller.
    pub fn is_deferred(&self) -> bool {
        !matches!(self, Self::AddressResolution { .. })
    }
}

/// Convert `io::Error` to `ChannelError` (for channel implementations
/// backed by real descriptors).
impl From<io::Error> for ChannelError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Failure raised by an unbind hook during teardown.
///
/// Caught and logged by the cleanup drain; never propagated, so one
/// connection's teardown failure cannot abort the remaining batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("teardown failed: {0}")]
pub struct TeardownError(pub String);

/// Errors surfaced by the construction API (`bind`/`connect`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManagerError {
    /// Channel fault during open. For `connect` this is address
    /// resolution; for `bind` typically a local bind failure.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Handler spec named a capability bundle that was never registered.
    #[error("unknown handler bundle: {0}")]
    UnknownBundle(&'static str),

    /// Connection limit reached; the manager refuses new connections.
    #[error("connection limit reached ({0})")]
    AtCapacity(usize),
}
