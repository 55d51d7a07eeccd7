//! A single logical endpoint: one channel paired with one handler.
//!
//! Connections expose the lifecycle operations the manager consumes and
//! nothing else; they never reach into the manager's collections. All
//! byte-level work happens inside the channel, all business logic inside
//! the handler.

use std::sync::Arc;

use crate::channel::{Channel, ChannelKind, Endpoint};
use crate::error::{ChannelError, TeardownError};
use crate::handler::{Handler, HandlerFactory};
use crate::selector::{ConnectionId, Selector};

/// Identity-bearing handle wrapping exactly one channel and one handler.
///
/// Owned by the manager's arena and addressed by
/// [`ConnectionId`](crate::ConnectionId) everywhere else.
pub struct Connection {
    channel: Box<dyn Channel>,
    handler: Box<dyn Handler>,
    /// Builds handlers for peers accepted on this connection.
    spawn_factory: Arc<dyn HandlerFactory>,
}

impl Connection {
    pub(crate) fn new(
        channel: Box<dyn Channel>,
        handler: Box<dyn Handler>,
        spawn_factory: Arc<dyn HandlerFactory>,
    ) -> Self {
        Self { channel, handler, spawn_factory }
    }

    /// Socket family of the underlying channel.
    pub fn kind(&self) -> ChannelKind {
        self.channel.kind()
    }

    /// Whether the channel still has buffered outbound data.
    pub fn can_send(&self) -> bool {
        self.channel.can_send()
    }

    /// Whether the channel has inbound data available.
    pub fn can_recv(&self) -> bool {
        self.channel.can_recv()
    }

    pub(crate) fn bind(&mut self, address: &str, endpoint: &Endpoint) -> Result<(), ChannelError> {
        self.channel.open_passive(address, endpoint)
    }

    pub(crate) fn connect(
        &mut self,
        address: &str,
        endpoint: &Endpoint,
    ) -> Result<(), ChannelError> {
        self.channel.open_active(address, endpoint)
    }

    pub(crate) fn register(
        &mut self,
        selector: &mut dyn Selector,
        id: ConnectionId,
    ) -> Result<(), ChannelError> {
        self.channel.register(selector, id)
    }

    /// Dispatch one readiness signal. An accepted peer channel is wrapped
    /// into a new connection whose handler comes from this connection's
    /// spawn factory.
    pub(crate) fn process_events(&mut self) -> Result<Option<Connection>, ChannelError> {
        match self.channel.process_events()? {
            Some(peer) => {
                let handler = self.spawn_factory.build();
                Ok(Some(Connection::new(peer, handler, Arc::clone(&self.spawn_factory))))
            },
            None => Ok(None),
        }
    }

    pub(crate) fn notify_connected(&mut self) {
        self.handler.on_connected();
    }

    pub(crate) fn notify_readable(&mut self) -> Result<(), ChannelError> {
        self.handler.on_readable(self.channel.as_mut())
    }

    pub(crate) fn unbind(&mut self, reason: Option<&ChannelError>) -> Result<(), TeardownError> {
        self.handler.unbind_with_reason(reason)
    }

    pub(crate) fn close_release(&mut self) {
        self.channel.release();
    }

    pub(crate) fn handler_mut(&mut self) -> &mut dyn Handler {
        self.handler.as_mut()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("kind", &self.kind()).finish_non_exhaustive()
    }
}
