//! Request dispatch and shard execution.
//!
//! # Data Flow
//! ```text
//! HTTP handler builds a ProxyRequest
//!     → Dispatcher::submit (global bounded queue)
//!     → manager.rs dispatch loop (round robin over shards, bounded hand-off)
//!     → worker.rs shard (pick address, forward, stream body back)
//!     → ResponseSink answers the handler's ResponseHandle
//!
//! Failures anywhere on the path
//!     → errors.rs queue → error loop (logged)
//! ```
//!
//! # Design Decisions
//! - Fixed number of long-lived tasks; nothing is spawned per request
//! - Every queue is bounded
//! - Dropping the handler's response handle is the client cancellation signal

pub mod errors;
pub mod manager;
pub mod request;
pub mod worker;

pub use errors::{ErrorEvent, ErrorReporter};
pub use manager::{Dispatcher, Drain, ShardManager};
pub use request::{ProxyRequest, ResponseHandle, ResponseSink};
pub use worker::{Shard, ShardSettings};
