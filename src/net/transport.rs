//! Upstream transport: the pre-built outbound HTTP client.
//!
//! # Responsibilities
//! - Build the pooled reqwest client once, with every connection timeout set
//! - Bound concurrent connections per upstream host
//! - Turn an upstream address plus the inbound path/query into a target URL
//!
//! # Design Decisions
//! - Clients are never built per request; connection reuse is what keeps
//!   the proxy viable under load
//! - reqwest applies `connect_timeout` to TCP and TLS together, so the
//!   configured handshake budget is added to the connect budget
//! - Redirects are returned to the client, never followed

use std::sync::Arc;
use std::time::Duration;

use axum::http::Uri;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use url::Url;

use crate::config::{TransportConfig, UpstreamScheme};
use crate::net::resolver::TimeoutResolver;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build upstream client: {0}")]
    Build(#[from] reqwest::Error),

    #[error("invalid upstream target {addr}: {source}")]
    Target {
        addr: String,
        #[source]
        source: url::ParseError,
    },

    #[error("connection limiter for {0} is closed")]
    LimiterClosed(String),
}

/// A configured outbound client plus per-host connection permits.
#[derive(Debug)]
pub struct UpstreamTransport {
    client: reqwest::Client,
    scheme: UpstreamScheme,
    request_timeout: Duration,
    max_connections_per_host: usize,
    host_permits: DashMap<String, Arc<Semaphore>>,
}

/// Held for the lifetime of one upstream exchange.
#[derive(Debug)]
pub struct HostPermit {
    _permit: OwnedSemaphorePermit,
}

impl UpstreamTransport {
    /// Build a transport from configuration.
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let connect_budget = Duration::from_millis(config.connect_timeout_ms + config.tls_handshake_timeout_ms);
        let resolver = TimeoutResolver::new(Duration::from_millis(config.dns_timeout_ms));

        let client = reqwest::Client::builder()
            .connect_timeout(connect_budget)
            .tcp_keepalive(Duration::from_secs(config.keepalive_secs))
            .pool_idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .pool_max_idle_per_host(config.max_idle_per_host)
            .dns_resolver(Arc::new(resolver))
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        tracing::debug!(
            scheme = config.upstream_scheme.as_str(),
            connect_ms = connect_budget.as_millis() as u64,
            max_idle_per_host = config.max_idle_per_host,
            max_connections_per_host = config.max_connections_per_host,
            "Upstream transport built"
        );

        Ok(Self {
            client,
            scheme: config.upstream_scheme,
            request_timeout: config.request_timeout(),
            max_connections_per_host: config.max_connections_per_host.max(1),
            host_permits: DashMap::new(),
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Bound on one upstream exchange (headers and body).
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Wait for a connection slot toward `host`.
    pub async fn acquire(&self, host: &str) -> Result<HostPermit, TransportError> {
        let semaphore = self
            .host_permits
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_connections_per_host)))
            .clone();

        semaphore
            .acquire_owned()
            .await
            .map(|permit| HostPermit { _permit: permit })
            .map_err(|_| TransportError::LimiterClosed(host.to_string()))
    }

    /// `scheme://addr` followed by the inbound path and query.
    pub fn target_url(&self, addr: &str, inbound: &Uri) -> Result<Url, TransportError> {
        let path_and_query = inbound.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        Url::parse(&format!("{}://{}{}", self.scheme.as_str(), addr, path_and_query)).map_err(|source| {
            TransportError::Target {
                addr: addr.to_string(),
                source,
            }
        })
    }
}
