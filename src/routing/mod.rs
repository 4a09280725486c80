//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request path
//!     → router.rs (location lookup)
//!     → matcher.rs (exact match, then longest prefix)
//!     → Return: Proxy(location) | Static(location) | NotFound
//!
//! Location Compilation (at startup):
//!     LocationConfig[] + UpstreamConfig[]
//!     → resolve upstream references
//!     → sort keys by length (longest first)
//!     → freeze as immutable LocationRouter
//! ```
//!
//! # Design Decisions
//! - Locations compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same location

pub mod matcher;
pub mod router;

pub use router::{LocationRouter, ProxyLocation, Route, RouterError, StaticLocation};
