//! Network layer subsystem (outbound side).
//!
//! # Data Flow
//! ```text
//! Shard picks an upstream address
//!     → transport.rs (target URL, per-host permit, pooled client)
//!     → resolver.rs (bounded DNS lookup)
//!     → TCP connect → TLS handshake → HTTP/1.1 or HTTP/2
//! ```
//!
//! # Design Decisions
//! - One client per shard by default, optionally one shared client
//! - Every outbound step has a deadline
//! - Per-host connection caps bound fan-out

pub mod resolver;
pub mod transport;

pub use transport::{HostPermit, TransportError, UpstreamTransport};
