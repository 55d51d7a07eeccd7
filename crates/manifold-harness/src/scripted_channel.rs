//! Scripted channel: a fully test-controlled socket double.
//!
//! A [`ScriptedChannel`] is owned by the manager like any channel, while
//! the test keeps a [`ChannelScript`] handle to the same shared state:
//! queue inbound messages, buffer outbound data, schedule accepted
//! peers, and inject faults at any point of the lifecycle.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use manifold_core::{Channel, ChannelError, ChannelKind, ConnectionId, Endpoint, Selector};

/// How a channel was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// `open_passive` (listening).
    Passive,
    /// `open_active` (connecting).
    Active,
}

#[derive(Default)]
struct ScriptState {
    open: Option<OpenMode>,
    resolution_fails: bool,
    closed_before_registration: bool,
    inbound: VecDeque<Bytes>,
    outbound: BytesMut,
    accept_queue: VecDeque<ScriptedChannel>,
    fail_next_process: Option<String>,
    events_processed: usize,
    released: bool,
}

/// Channel double handed to the manager.
pub struct ScriptedChannel {
    kind: ChannelKind,
    state: Rc<RefCell<ScriptState>>,
}

impl ScriptedChannel {
    /// Create a channel of the given kind together with its script
    /// handle.
    pub fn new(kind: ChannelKind) -> (Self, ChannelScript) {
        let state = Rc::new(RefCell::new(ScriptState::default()));
        let script = ChannelScript { state: Rc::clone(&state) };
        (Self { kind, state }, script)
    }
}

impl Channel for ScriptedChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn open_passive(&mut self, _address: &str, _endpoint: &Endpoint) -> Result<(), ChannelError> {
        self.state.borrow_mut().open = Some(OpenMode::Passive);
        Ok(())
    }

    fn open_active(&mut self, address: &str, _endpoint: &Endpoint) -> Result<(), ChannelError> {
        let mut state = self.state.borrow_mut();
        if state.resolution_fails {
            return Err(ChannelError::AddressResolution { address: address.to_string() });
        }
        state.open = Some(OpenMode::Active);
        Ok(())
    }

    fn register(
        &mut self,
        selector: &mut dyn Selector,
        id: ConnectionId,
    ) -> Result<(), ChannelError> {
        if self.state.borrow().closed_before_registration {
            return Err(ChannelError::Closed);
        }
        selector.add(id);
        Ok(())
    }

    fn process_events(&mut self) -> Result<Option<Box<dyn Channel>>, ChannelError> {
        let mut state = self.state.borrow_mut();
        if let Some(message) = state.fail_next_process.take() {
            return Err(ChannelError::Io(message));
        }
        state.events_processed += 1;
        if let Some(peer) = state.accept_queue.pop_front() {
            return Ok(Some(Box::new(peer)));
        }
        Ok(None)
    }

    fn can_send(&self) -> bool {
        !self.state.borrow().outbound.is_empty()
    }

    fn can_recv(&self) -> bool {
        !self.state.borrow().inbound.is_empty()
    }

    fn release(&mut self) {
        tracing::trace!("scripted channel released");
        self.state.borrow_mut().released = true;
    }
}

/// Test-side handle to a [`ScriptedChannel`]'s shared state.
#[derive(Clone)]
pub struct ChannelScript {
    state: Rc<RefCell<ScriptState>>,
}

impl ChannelScript {
    /// Queue an inbound message; `can_recv` reports true until drained.
    pub fn push_message(&self, payload: &[u8]) {
        self.state.borrow_mut().inbound.push_back(Bytes::copy_from_slice(payload));
    }

    /// Take one queued inbound message, front first.
    pub fn take_message(&self) -> Option<Bytes> {
        self.state.borrow_mut().inbound.pop_front()
    }

    /// Number of queued inbound messages.
    pub fn message_count(&self) -> usize {
        self.state.borrow().inbound.len()
    }

    /// Buffer outbound data; `can_send` reports true until cleared.
    pub fn buffer_outbound(&self, payload: &[u8]) {
        self.state.borrow_mut().outbound.extend_from_slice(payload);
    }

    /// Drop all buffered outbound data, as if the channel flushed.
    pub fn clear_outbound(&self) {
        self.state.borrow_mut().outbound.clear();
    }

    /// Make `connect` fail with an address-resolution error.
    pub fn fail_resolution(&self) {
        self.state.borrow_mut().resolution_fails = true;
    }

    /// Make selector registration fail with `ChannelError::Closed`, as
    /// if the descriptor was invalidated concurrently.
    pub fn fail_registration(&self) {
        self.state.borrow_mut().closed_before_registration = true;
    }

    /// Make the next `process_events` call fail with an I/O error.
    pub fn fail_next_process(&self, message: &str) {
        self.state.borrow_mut().fail_next_process = Some(message.to_string());
    }

    /// Schedule an accepted peer to be returned by the next
    /// `process_events` call; returns the peer's script handle.
    pub fn queue_accept(&self, kind: ChannelKind) -> ChannelScript {
        let (peer, script) = ScriptedChannel::new(kind);
        self.state.borrow_mut().accept_queue.push_back(peer);
        script
    }

    /// How the channel was opened, if it was.
    pub fn open_mode(&self) -> Option<OpenMode> {
        self.state.borrow().open
    }

    /// Number of successful `process_events` dispatches.
    pub fn events_processed(&self) -> usize {
        self.state.borrow().events_processed
    }

    /// Whether the channel's descriptor has been released.
    pub fn released(&self) -> bool {
        self.state.borrow().released
    }
}
