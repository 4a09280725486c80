//! DNS resolution with its own deadline.
//!
//! reqwest's default resolver has no timeout of its own; a stalled lookup
//! would otherwise eat the whole connect budget.

use std::error::Error as StdError;
use std::net::SocketAddr;
use std::time::Duration;

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("DNS lookup for {host} timed out after {timeout:?}")]
pub struct ResolveTimeout {
    pub host: String,
    pub timeout: Duration,
}

/// Resolver backed by `tokio::net::lookup_host`, bounded by `timeout`.
#[derive(Debug, Clone)]
pub struct TimeoutResolver {
    timeout: Duration,
}

impl TimeoutResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Resolve for TimeoutResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let timeout = self.timeout;
        let host = name.as_str().to_string();

        Box::pin(async move {
            // Port is replaced by the connector; only the IPs matter here.
            let lookup = tokio::net::lookup_host((host.clone(), 0));
            match tokio::time::timeout(timeout, lookup).await {
                Ok(Ok(addrs)) => {
                    let addrs: Vec<SocketAddr> = addrs.collect();
                    tracing::trace!(host = %host, count = addrs.len(), "Resolved upstream host");
                    Ok(Box::new(addrs.into_iter()) as Addrs)
                }
                Ok(Err(e)) => Err(Box::new(e) as Box<dyn StdError + Send + Sync>),
                Err(_) => Err(Box::new(ResolveTimeout { host, timeout }) as Box<dyn StdError + Send + Sync>),
            }
        })
    }
}

