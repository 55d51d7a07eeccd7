//! Lifecycle-set invariant checks.
//!
//! These capture the structural properties that must hold after every
//! manager operation, independent of scenario: an id lives in at most
//! one of {pending, active}, the message-queue subset never escapes the
//! active set, and every indexed id is backed by an arena entry.

use std::collections::HashSet;
use std::fmt;

use manifold_core::{ConnectionManager, Selector};

/// A violated invariant, with a human-readable description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// What went wrong, naming the offending ids.
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invariant violated: {}", self.message)
    }
}

impl std::error::Error for Violation {}

/// Check the manager's lifecycle sets for structural consistency.
pub fn check_lifecycle_sets<S: Selector>(manager: &ConnectionManager<S>) -> Result<(), Violation> {
    let pending: HashSet<_> = manager.pending_ids().into_iter().collect();
    let active: HashSet<_> = manager.active_ids().into_iter().collect();
    let message_queue: HashSet<_> = manager.message_queue_ids().into_iter().collect();

    if let Some(id) = pending.intersection(&active).next() {
        return Err(Violation { message: format!("{id} is both pending and active") });
    }

    for id in &message_queue {
        if !active.contains(id) {
            return Err(Violation {
                message: format!("{id} is in the message-queue subset but not active"),
            });
        }
    }

    for id in pending.union(&active) {
        if manager.state_of(*id).is_none() {
            return Err(Violation { message: format!("{id} is indexed but has no arena entry") });
        }
    }

    Ok(())
}
