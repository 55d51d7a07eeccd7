//! Channel factory double.
//!
//! Maps endpoints to scripted channels the way a production factory
//! maps them to socket variants: a port endpoint yields a stream
//! channel, a socket-type endpoint a message-queue channel. Every
//! created channel's script handle is retained so tests can drive
//! channels they did not construct themselves.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;

use manifold_core::{Channel, ChannelFactory, ChannelKind, Endpoint};

use crate::scripted_channel::{ChannelScript, ScriptedChannel};

#[derive(Default)]
struct FactoryState {
    scripts: Vec<ChannelScript>,
    prepared: VecDeque<ScriptedChannel>,
    unresolvable: HashSet<String>,
    refuse_registration: HashSet<String>,
}

/// Factory producing [`ScriptedChannel`]s, with per-address fault
/// injection.
///
/// Cloning yields another handle to the same state, so a test can keep
/// one clone while the manager owns the other.
#[derive(Clone, Default)]
pub struct ScriptedFactory {
    state: Rc<RefCell<FactoryState>>,
}

impl ScriptedFactory {
    /// Create an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Channels created for this address fail active open with an
    /// address-resolution error.
    pub fn mark_unresolvable(&self, address: &str) {
        self.state.borrow_mut().unresolvable.insert(address.to_string());
    }

    /// Channels created for this address fail selector registration, as
    /// if closed between creation and the registration drain.
    pub fn refuse_registration(&self, address: &str) {
        self.state.borrow_mut().refuse_registration.insert(address.to_string());
    }

    /// Script handle for the n-th created channel, in creation order.
    pub fn script(&self, index: usize) -> Option<ChannelScript> {
        self.state.borrow().scripts.get(index).cloned()
    }

    /// Script handle for the most recently created channel.
    pub fn last_script(&self) -> Option<ChannelScript> {
        self.state.borrow().scripts.last().cloned()
    }

    /// Number of channels created so far.
    pub fn created(&self) -> usize {
        self.state.borrow().scripts.len()
    }

    /// Pre-create the next channel this factory will hand out, so a
    /// test can wire its script into a handler before calling
    /// `bind`/`connect`. Prepared channels keep their given kind; the
    /// endpoint of the construction call is ignored for them.
    pub fn prepare(&self, kind: ChannelKind) -> ChannelScript {
        let (channel, script) = ScriptedChannel::new(kind);
        let mut state = self.state.borrow_mut();
        state.prepared.push_back(channel);
        state.scripts.push(script.clone());
        script
    }
}

impl ChannelFactory for ScriptedFactory {
    fn create(&self, address: &str, endpoint: &Endpoint) -> Box<dyn Channel> {
        let mut state = self.state.borrow_mut();
        if let Some(prepared) = state.prepared.pop_front() {
            return Box::new(prepared);
        }

        let kind = match endpoint {
            Endpoint::Port(_) => ChannelKind::Stream,
            Endpoint::SocketType(_) => ChannelKind::MessageQueue,
        };
        let (channel, script) = ScriptedChannel::new(kind);
        if state.unresolvable.contains(address) {
            script.fail_resolution();
        }
        if state.refuse_registration.contains(address) {
            script.fail_registration();
        }
        state.scripts.push(script);
        Box::new(channel)
    }
}
