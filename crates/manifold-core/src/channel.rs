//! Channel boundary: the non-blocking socket abstraction.
//!
//! A channel is one socket of some family behind a uniform capability
//! set. The core never parses bytes or speaks a protocol; it only opens,
//! registers, dispatches and releases channels. Concrete variants (TCP
//! stream, message-queue socket, message-over-stream) live outside the
//! core behind [`ChannelFactory`].

use crate::error::ChannelError;
use crate::selector::{ConnectionId, Selector};

/// Socket family of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Plain byte-stream socket (e.g. TCP).
    Stream,
    /// Message-queue socket whose readiness descriptor only re-arms once
    /// the socket has been fully drained.
    MessageQueue,
    /// Message-framed transport over a stream socket.
    MessageStream,
}

impl ChannelKind {
    /// Whether connections of this kind must be polled manually every
    /// reactor cycle.
    ///
    /// Message-queue sockets do not follow the selector's edge/level
    /// semantics: a message arriving between the last drain and the next
    /// selector wait would never re-trigger the descriptor, so the
    /// manager asks them directly each cycle.
    pub fn needs_manual_poll(self) -> bool {
        matches!(self, Self::MessageQueue)
    }
}

/// Where a channel attaches: a network port for stream variants, or a
/// message-queue socket-type tag for queue variants.
///
/// Which variant a given endpoint selects is decided by the
/// [`ChannelFactory`], outside the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Network port.
    Port(u16),
    /// Message-queue socket-type tag (e.g. "pub", "router").
    SocketType(String),
}

/// Capability set implemented by every socket variant.
///
/// All operations are non-blocking. Channels are exclusively owned by
/// their connection; nothing in the core aliases them.
pub trait Channel {
    /// Socket family of this channel.
    fn kind(&self) -> ChannelKind;

    /// Passive open: start listening on `address`/`endpoint`.
    fn open_passive(&mut self, address: &str, endpoint: &Endpoint) -> Result<(), ChannelError>;

    /// Active open: initiate a connection to `address`/`endpoint`.
    ///
    /// Fails with [`ChannelError::AddressResolution`] if the address
    /// cannot be resolved; that fault is surfaced synchronously to the
    /// construction API caller.
    fn open_active(&mut self, address: &str, endpoint: &Endpoint) -> Result<(), ChannelError>;

    /// Register this channel's descriptor with the selector under `id`.
    ///
    /// Fails with [`ChannelError::Closed`] if the descriptor was
    /// invalidated between creation and registration; the manager turns
    /// that into a deferred close rather than raising.
    fn register(&mut self, selector: &mut dyn Selector, id: ConnectionId)
    -> Result<(), ChannelError>;

    /// Process whatever the readiness signal indicated: accept, read,
    /// flush. Returns the accepted peer channel if this is a listening
    /// channel and a peer was accepted.
    fn process_events(&mut self) -> Result<Option<Box<dyn Channel>>, ChannelError>;

    /// Whether outbound data is still buffered and unsent.
    fn can_send(&self) -> bool;

    /// Whether inbound data is available to consume.
    fn can_recv(&self) -> bool;

    /// Release the underlying descriptor. Terminal; the channel is never
    /// used again afterwards.
    fn release(&mut self);
}

/// Produces unopened channels for the construction API.
///
/// The stream-versus-message-queue dispatch lives here: the factory
/// inspects the endpoint (and whatever configuration it carries) and
/// picks the variant. Injected into the manager at construction.
pub trait ChannelFactory {
    /// Create an unopened channel for the given address and endpoint.
    fn create(&self, address: &str, endpoint: &Endpoint) -> Box<dyn Channel>;
}
