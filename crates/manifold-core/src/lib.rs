//! Connection-lifecycle core of a selector-driven event reactor.
//!
//! A single-threaded, non-blocking multiplexer core that manages
//! heterogeneous socket types (byte-stream sockets and message-queue
//! sockets) under one readiness loop. The hard problem it solves is
//! safe lifecycle transition under iteration: connections are created
//! asynchronously relative to the poll loop, registered without
//! disturbing an in-progress readiness scan, and torn down without
//! mutating collections the loop is iterating.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       external driver                        │
//! │      (selector wait, timers, repeated process/cleanup)       │
//! └───────────────┬──────────────────────────────┬───────────────┘
//!                 │ process()                    │ cleanup()
//! ┌───────────────▼──────────────────────────────▼───────────────┐
//! │                      ConnectionManager                       │
//! │   arena + lifecycle tags   pending / active / mq index sets  │
//! └───────┬──────────────────────┬──────────────────────┬────────┘
//!         │ register/ready       │ events               │ unbind
//! ┌───────▼────────┐    ┌────────▼────────┐    ┌────────▼────────┐
//! │    Selector    │    │   Connection    │    │     Handler     │
//! │ (opaque oracle)│    │ (channel pair)  │    │   (user logic)  │
//! └────────────────┘    └─────────────────┘    └─────────────────┘
//! ```
//!
//! The core follows the sans-I/O pattern: channels, the selector, and
//! handlers are trait boundaries, so the same orchestration code runs
//! against real sockets in production and scripted doubles in tests.
//! Protocol codecs, timer scheduling, and the outer driving loop are
//! out of scope.
//!
//! # Fault policy
//!
//! Only address-resolution failures cross the public boundary (from
//! `connect`, synchronously). Registration and dispatch faults become
//! deferred close requests carrying the originating reason; unbind-hook
//! faults are logged and swallowed. No connection-level fault can
//! terminate a reactor cycle or corrupt the manager's collections.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod channel;
pub mod connection;
pub mod error;
pub mod handler;
pub mod manager;
pub mod selector;

pub use channel::{Channel, ChannelFactory, ChannelKind, Endpoint};
pub use connection::Connection;
pub use error::{ChannelError, ManagerError, TeardownError};
pub use handler::{Handler, HandlerFactory, HandlerSpec, NoopFactory, NoopHandler};
pub use manager::{ConnectionManager, Lifecycle, ManagerConfig};
pub use selector::{ConnectionId, Selector};
