//! Handler boundary: user-supplied connection callbacks.
//!
//! Handlers receive lifecycle notifications; their business logic is
//! outside the core. The unbind hook keeps the dual-arity contract of
//! the construction API, resolved statically: a handler implements
//! either `unbind` or `unbind_with_reason` (the latter defaults to
//! forwarding), and the core always calls `unbind_with_reason`.

use std::sync::Arc;

use crate::channel::Channel;
use crate::error::{ChannelError, TeardownError};

/// Callbacks delivered to a connection's owner.
///
/// Every method has a default so a handler implements only what it
/// cares about. All hooks run on the reactor thread; none may block.
pub trait Handler {
    /// Connection became established (registered with the selector).
    ///
    /// For message-queue connections this fires immediately at the
    /// registration drain, since those channels have no connect event
    /// the selector could observe.
    fn on_connected(&mut self) {}

    /// The channel has data available.
    ///
    /// Message-queue handlers must drain the channel completely here:
    /// the underlying descriptor only re-arms once empty.
    fn on_readable(&mut self, channel: &mut dyn Channel) -> Result<(), ChannelError> {
        let _ = channel;
        Ok(())
    }

    /// Teardown hook, reason-less form.
    ///
    /// Implement this if the handler does not care why it is going away.
    fn unbind(&mut self) -> Result<(), TeardownError> {
        Ok(())
    }

    /// Teardown hook, reason-aware form. `reason` is the originating
    /// fault for error-driven closes, `None` for requested ones.
    ///
    /// The core always calls this form; the default forwards to
    /// [`Handler::unbind`], so implementing exactly one of the two is
    /// enough.
    fn unbind_with_reason(&mut self, reason: Option<&ChannelError>) -> Result<(), TeardownError> {
        let _ = reason;
        self.unbind()
    }
}

/// Bare base handler: accepts every notification and does nothing.
///
/// Used when a connection is constructed without a handler spec.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl Handler for NoopHandler {}

/// Builds a fresh handler per connection.
///
/// Shared (via `Arc`) between a listening connection and the peers it
/// spawns, so accepted connections get handlers of the same shape as
/// their listener.
pub trait HandlerFactory {
    /// Build one handler instance.
    fn build(&self) -> Box<dyn Handler>;
}

impl<F> HandlerFactory for F
where
    F: Fn() -> Box<dyn Handler>,
{
    fn build(&self) -> Box<dyn Handler> {
        self()
    }
}

/// Factory for the bare base handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFactory;

impl HandlerFactory for NoopFactory {
    fn build(&self) -> Box<dyn Handler> {
        Box::new(NoopHandler)
    }
}

/// Polymorphic handler specification for `bind`/`connect`.
///
/// A tagged variant type resolved once at construction; no runtime type
/// inspection happens after this point.
pub enum HandlerSpec {
    /// Type-like: build a fresh handler from the factory. The factory is
    /// retained to spawn handlers for accepted peers.
    Factory(Arc<dyn HandlerFactory>),

    /// Already-constructed handler passed through unchanged. Supports
    /// reconnect-with-existing-object flows; accepted peers of such a
    /// connection fall back to the bare base handler.
    Existing(Box<dyn Handler>),

    /// Named capability bundle, resolved (and cached, keyed by name)
    /// through the manager's bundle registry.
    Bundle(&'static str),

    /// No handler: instantiate the bare base handler.
    Default,
}

impl std::fmt::Debug for HandlerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Factory(_) => f.write_str("HandlerSpec::Factory"),
            Self::Existing(_) => f.write_str("HandlerSpec::Existing"),
            Self::Bundle(name) => write!(f, "HandlerSpec::Bundle({name})"),
            Self::Default => f.write_str("HandlerSpec::Default"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PlainUnbind {
        called: bool,
    }

    impl Handler for PlainUnbind {
        fn unbind(&mut self) -> Result<(), TeardownError> {
            self.called = true;
            Ok(())
        }
    }

    #[test]
    fn reason_aware_default_forwards_to_plain_unbind() {
        let mut handler = PlainUnbind { called: false };
        let reason = ChannelError::Closed;
        handler.unbind_with_reason(Some(&reason)).unwrap();
        assert!(handler.called);
    }

    #[test]
    fn closure_factories_build_handlers() {
        let factory: Arc<dyn HandlerFactory> = Arc::new(|| Box::new(NoopHandler) as Box<dyn Handler>);
        let mut handler = factory.build();
        assert!(handler.unbind_with_reason(None).is_ok());
    }
}
