//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the sharded proxy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Inbound listener settings.
    pub server: ServerConfig,

    /// Number of shards (concurrent upstream workers).
    pub shard_count: usize,

    /// Bytes buffered between a shard and a client connection while
    /// streaming a response body.
    pub buffer_size: usize,

    /// Algorithm used to pick an address inside an upstream group.
    pub load_balancing_alg: LoadBalancingAlgorithm,

    /// Named upstream groups referenced by proxy locations.
    pub upstreams: Vec<UpstreamConfig>,

    /// Location table. Paths are unique; `/` must be present.
    pub locations: Vec<LocationConfig>,

    /// Error page served by static locations, relative to the location root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_file: Option<String>,

    /// Admission control settings.
    pub admission: AdmissionConfig,

    /// Global queue and shard hand-off settings.
    pub dispatch: DispatchConfig,

    /// Outbound client settings.
    pub transport: TransportConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            shard_count: 8,
            buffer_size: 8192,
            load_balancing_alg: LoadBalancingAlgorithm::RoundRobin,
            upstreams: vec![UpstreamConfig {
                name: "backend-1".to_string(),
                addrs: vec!["127.0.0.1:8000".to_string(), "127.0.0.1:8001".to_string()],
            }],
            locations: vec![LocationConfig {
                path: "/".to_string(),
                upstream: None,
                root: Some("./static".to_string()),
                index_file: default_index_file(),
            }],
            error_file: None,
            admission: AdmissionConfig::default(),
            dispatch: DispatchConfig::default(),
            transport: TransportConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Look up an upstream group by name.
    pub fn upstream(&self, name: &str) -> Option<&UpstreamConfig> {
        self.upstreams.iter().find(|u| u.name == name)
    }

    /// Capacity of the admission gate.
    pub fn admission_capacity(&self) -> usize {
        self.admission.max_concurrent.unwrap_or(self.shard_count)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Upper bound on a whole inbound request, in seconds.
    pub request_timeout_secs: u64,

    /// Time allowed for in-flight HTTP connections to finish after shutdown.
    pub shutdown_timeout_secs: u64,

    /// Largest request body forwarded upstream, in bytes.
    pub max_body_bytes: usize,
}

impl ServerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 60,
            shutdown_timeout_secs: 5,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Upstream selection algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingAlgorithm {
    RoundRobin,
    LeastConn,
    ConsistentHashing,
}

impl LoadBalancingAlgorithm {
    /// Whether this build can actually run the algorithm.
    pub fn is_implemented(&self) -> bool {
        matches!(self, LoadBalancingAlgorithm::RoundRobin)
    }
}

impl std::fmt::Display for LoadBalancingAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LoadBalancingAlgorithm::RoundRobin => "round_robin",
            LoadBalancingAlgorithm::LeastConn => "least_conn",
            LoadBalancingAlgorithm::ConsistentHashing => "consistent_hashing",
        };
        f.write_str(name)
    }
}

/// A named group of upstream addresses.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Group name referenced from locations.
    pub name: String,

    /// Ordered `host:port` entries.
    pub addrs: Vec<String>,
}

/// A location entry: either a static root or a proxy to an upstream group.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocationConfig {
    /// Path key (`/` or `/segment/`).
    pub path: String,

    /// Upstream group name for proxy locations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,

    /// Directory served by static locations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,

    /// File served for directory requests on static locations.
    #[serde(default = "default_index_file")]
    pub index_file: String,
}

fn default_index_file() -> String {
    "index.html".to_string()
}

/// Admission gate configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Maximum concurrently admitted requests. Defaults to the shard count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,
}

/// Dispatch queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Depth of the global inbound queue.
    pub queue_capacity: usize,

    /// Depth of each shard's private queue.
    pub shard_queue_capacity: usize,

    /// Bounded wait when handing a request to a shard, in milliseconds.
    pub handoff_timeout_ms: u64,

    /// Deadline for draining shards on shutdown, in seconds.
    pub shutdown_timeout_secs: u64,

    /// Depth of the error-event queue.
    pub error_queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 128,
            shard_queue_capacity: 1,
            handoff_timeout_ms: 2000,
            shutdown_timeout_secs: 30,
            error_queue_capacity: 256,
        }
    }
}

impl DispatchConfig {
    pub fn handoff_timeout(&self) -> Duration {
        Duration::from_millis(self.handoff_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Scheme used toward upstreams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamScheme {
    Https,
    Http,
}

impl UpstreamScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamScheme::Https => "https",
            UpstreamScheme::Http => "http",
        }
    }
}

/// Outbound HTTP client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Share one client across shards instead of one client per shard.
    pub shared_client: bool,

    /// Scheme used for every upstream call.
    pub upstream_scheme: UpstreamScheme,

    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// TCP keep-alive interval in seconds.
    pub keepalive_secs: u64,

    /// DNS resolution timeout in milliseconds.
    pub dns_timeout_ms: u64,

    /// Idle pooled connection timeout in seconds.
    pub idle_timeout_secs: u64,

    /// TLS handshake budget in milliseconds.
    pub tls_handshake_timeout_ms: u64,

    /// Idle pooled connections kept per upstream host.
    pub max_idle_per_host: usize,

    /// Concurrent connections allowed per upstream host.
    pub max_connections_per_host: usize,

    /// Bound on one upstream exchange, in seconds.
    pub request_timeout_secs: u64,

    /// Accept invalid upstream certificates (testing only).
    pub accept_invalid_certs: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            shared_client: false,
            upstream_scheme: UpstreamScheme::Https,
            connect_timeout_ms: 5_000,
            keepalive_secs: 30,
            dns_timeout_ms: 2_000,
            idle_timeout_secs: 90,
            tls_handshake_timeout_ms: 5_000,
            max_idle_per_host: 10,
            max_connections_per_host: 10,
            request_timeout_secs: 20,
            accept_invalid_certs: false,
        }
    }
}

impl TransportConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
