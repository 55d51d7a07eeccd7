//! Selector boundary: the readiness oracle.
//!
//! The manager treats the selector as opaque. Its whole contract is
//! "accept a key into the interest set" plus "give me the batch of keys
//! that became ready since I last asked". Whether that is epoll, kqueue,
//! or a virtual selector in tests is invisible to the core.

use std::fmt;

/// Stable identifier for a connection.
///
/// Assigned once at construction and valid for the connection's whole
/// life; doubles as the selector wake-up key. Never reused within a
/// manager instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create an id from its raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value of this id.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Readiness multiplexer consumed by the manager.
///
/// Implementations map connection ids to whatever the underlying OS
/// facility uses for wake-up keys. The manager only ever calls `add`
/// (via [`Channel::register`](crate::Channel::register)) and `ready`.
pub trait Selector {
    /// Add a key to the interest set.
    ///
    /// Called by channels from their `register` implementation once the
    /// descriptor has been validated.
    fn add(&mut self, id: ConnectionId);

    /// Keys reported ready since the last call.
    ///
    /// Draining: a key is returned at most once per readiness signal.
    /// The blocking wait itself belongs to the external driver, not to
    /// implementations of this method.
    fn ready(&mut self) -> Vec<ConnectionId>;
}
