//! Virtual selector: a readiness oracle driven by the test.
//!
//! Tests arm readiness explicitly with [`VirtualSelector::mark_ready`];
//! the manager observes exactly the batches a real selector would have
//! reported, with no descriptors involved.

use std::collections::HashSet;

use manifold_core::{ConnectionId, Selector};

/// Selector double with an explicit interest set and test-armed
/// readiness.
#[derive(Debug, Default)]
pub struct VirtualSelector {
    registered: HashSet<ConnectionId>,
    armed: Vec<ConnectionId>,
}

impl VirtualSelector {
    /// Create an empty selector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a key: it will appear in the next `ready` batch, provided it
    /// is registered by then. Unregistered keys are silently dropped,
    /// like a wakeup for a descriptor that was never added.
    pub fn mark_ready(&mut self, id: ConnectionId) {
        tracing::trace!(%id, "armed readiness");
        self.armed.push(id);
    }

    /// Whether a key is in the interest set.
    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.registered.contains(&id)
    }

    /// Size of the interest set.
    pub fn registered_count(&self) -> usize {
        self.registered.len()
    }
}

impl Selector for VirtualSelector {
    fn add(&mut self, id: ConnectionId) {
        self.registered.insert(id);
    }

    fn ready(&mut self) -> Vec<ConnectionId> {
        let armed = std::mem::take(&mut self.armed);
        armed.into_iter().filter(|id| self.registered.contains(id)).collect()
    }
}
