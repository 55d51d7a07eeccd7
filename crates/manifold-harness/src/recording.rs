//! Recording handlers for observing lifecycle notifications.
//!
//! Handlers share a [`HandlerLog`] with the test through `Rc`, so every
//! notification the manager delivers is visible from outside without
//! reaching into the manager's collections.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;
use manifold_core::{Channel, ChannelError, Handler, TeardownError};

use crate::scripted_channel::ChannelScript;

/// Everything a recording handler observed.
#[derive(Debug, Default)]
pub struct HandlerLog {
    /// `on_connected` deliveries.
    pub connected: usize,
    /// `on_readable` deliveries.
    pub readable: usize,
    /// Reasons passed to `unbind_with_reason`, in delivery order.
    pub reasons: Vec<Option<ChannelError>>,
    /// Reason-less `unbind` deliveries (plain-arity handlers only).
    pub plain_unbinds: usize,
    /// Messages drained from the channel script, if one is attached.
    pub received: Vec<Bytes>,
}

/// Shared log handle.
pub type SharedLog = Rc<RefCell<HandlerLog>>;

/// Create an empty shared log.
pub fn shared_log() -> SharedLog {
    Rc::new(RefCell::new(HandlerLog::default()))
}

/// Handler that records every notification; implements the reason-aware
/// unbind form.
///
/// With a [`ChannelScript`] attached it drains the channel completely on
/// each readable notification, the way a well-behaved message-queue
/// handler must.
pub struct RecordingHandler {
    log: SharedLog,
    script: Option<ChannelScript>,
    fail_unbind: bool,
}

impl RecordingHandler {
    /// Recording handler that leaves channel data in place.
    pub fn new(log: SharedLog) -> Self {
        Self { log, script: None, fail_unbind: false }
    }

    /// Recording handler that drains the scripted channel on readable.
    pub fn draining(log: SharedLog, script: ChannelScript) -> Self {
        Self { log, script: Some(script), fail_unbind: false }
    }

    /// Recording handler whose unbind hook fails.
    pub fn failing_unbind(log: SharedLog) -> Self {
        Self { log, script: None, fail_unbind: true }
    }
}

impl Handler for RecordingHandler {
    fn on_connected(&mut self) {
        self.log.borrow_mut().connected += 1;
    }

    fn on_readable(&mut self, _channel: &mut dyn Channel) -> Result<(), ChannelError> {
        let mut log = self.log.borrow_mut();
        log.readable += 1;
        if let Some(script) = &self.script {
            while let Some(message) = script.take_message() {
                log.received.push(message);
            }
        }
        Ok(())
    }

    fn unbind_with_reason(&mut self, reason: Option<&ChannelError>) -> Result<(), TeardownError> {
        self.log.borrow_mut().reasons.push(reason.cloned());
        if self.fail_unbind {
            return Err(TeardownError("scripted unbind failure".to_string()));
        }
        Ok(())
    }
}

/// Handler implementing only the reason-less unbind form, for the
/// dual-arity dispatch contract.
pub struct PlainHandler {
    log: SharedLog,
}

impl PlainHandler {
    /// Plain-arity handler writing to the shared log.
    pub fn new(log: SharedLog) -> Self {
        Self { log }
    }
}

impl Handler for PlainHandler {
    fn unbind(&mut self) -> Result<(), TeardownError> {
        self.log.borrow_mut().plain_unbinds += 1;
        Ok(())
    }
}
