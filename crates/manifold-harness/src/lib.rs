//! Deterministic test harness for the manifold reactor core.
//!
//! Scripted doubles for every boundary the core consumes: channels
//! whose readiness, faults and accepted peers are driven by the test
//! ([`ScriptedChannel`]), a selector whose ready batches are armed
//! explicitly ([`VirtualSelector`]), and handlers that record every
//! notification they receive ([`RecordingHandler`]).
//!
//! # Invariant checking
//!
//! The `invariants` module verifies the structural properties of the
//! manager's lifecycle sets after arbitrary operation sequences; the
//! property tests under `tests/` drive it with randomized schedules.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod recording;
pub mod scripted_channel;
pub mod scripted_factory;
pub mod virtual_selector;

pub use invariants::{Violation, check_lifecycle_sets};
pub use recording::{HandlerLog, PlainHandler, RecordingHandler, SharedLog, shared_log};
pub use scripted_channel::{ChannelScript, OpenMode, ScriptedChannel};
pub use scripted_factory::ScriptedFactory;
pub use virtual_selector::VirtualSelector;
