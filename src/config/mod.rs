//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize, write defaults if missing)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → shared via Arc to router, shard manager and transports
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no reload path
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_or_init, parse_config, ConfigError};
pub use schema::{
    DispatchConfig, LoadBalancingAlgorithm, LocationConfig, ProxyConfig, ServerConfig,
    TransportConfig, UpstreamConfig, UpstreamScheme,
};
pub use validation::ValidationError;
