//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing, timeout)
//!     → admission.rs (non-blocking concurrency gate, 429 on overload)
//!     → [routing layer classifies the path]
//!     → static_files.rs | shard pool
//!     → request.rs (forwarding headers) / response.rs (hop-by-hop stripping)
//!     → Send to client
//! ```

pub mod admission;
pub mod request;
pub mod response;
pub mod server;
pub mod static_files;

pub use admission::AdmissionController;
pub use server::HttpServer;
