//! Configuration validation.
//!
//! Semantic checks only; serde handles syntax. Every failure is collected so
//! an operator sees the full list at once.

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("shard_count must be at least 1")]
    NoShards,

    #[error("buffer_size must be at least 4096, got {0}")]
    BufferTooSmall(usize),

    #[error("server.bind_address `{0}` is not a socket address")]
    InvalidBindAddress(String),

    #[error("location path `{0}` must be `/` or start and end with `/`")]
    InvalidLocationPath(String),

    #[error("location path `{0}` is declared more than once")]
    DuplicateLocation(String),

    #[error("a root location `/` is required")]
    MissingRootLocation,

    #[error("location `{0}` must set exactly one of `upstream` or `root`")]
    AmbiguousLocation(String),

    #[error("location `{location}` references unknown upstream `{upstream}`")]
    UnknownUpstream { location: String, upstream: String },

    #[error("upstream `{0}` is declared more than once")]
    DuplicateUpstream(String),

    #[error("upstream `{0}` has no addresses")]
    EmptyUpstream(String),

    #[error("upstream `{upstream}` address `{addr}` is not host:port")]
    InvalidUpstreamAddress { upstream: String, addr: String },

    #[error("load balancing algorithm `{0}` is not implemented")]
    UnsupportedAlgorithm(String),

    #[error("`{0}` must be greater than zero")]
    Zero(&'static str),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.shard_count == 0 {
        errors.push(ValidationError::NoShards);
    }
    if config.buffer_size < 4096 {
        errors.push(ValidationError::BufferTooSmall(config.buffer_size));
    }
    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(config.server.bind_address.clone()));
    }
    if !config.load_balancing_alg.is_implemented() {
        errors.push(ValidationError::UnsupportedAlgorithm(config.load_balancing_alg.to_string()));
    }

    check_positive(&mut errors, config);
    check_upstreams(&mut errors, config);
    check_locations(&mut errors, config);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_positive(errors: &mut Vec<ValidationError>, config: &ProxyConfig) {
    let fields: [(&'static str, u64); 11] = [
        ("server.request_timeout_secs", config.server.request_timeout_secs),
        ("server.max_body_bytes", config.server.max_body_bytes as u64),
        ("dispatch.queue_capacity", config.dispatch.queue_capacity as u64),
        ("dispatch.shard_queue_capacity", config.dispatch.shard_queue_capacity as u64),
        ("dispatch.handoff_timeout_ms", config.dispatch.handoff_timeout_ms),
        ("dispatch.shutdown_timeout_secs", config.dispatch.shutdown_timeout_secs),
        ("dispatch.error_queue_capacity", config.dispatch.error_queue_capacity as u64),
        ("transport.connect_timeout_ms", config.transport.connect_timeout_ms),
        ("transport.dns_timeout_ms", config.transport.dns_timeout_ms),
        ("transport.max_connections_per_host", config.transport.max_connections_per_host as u64),
        ("transport.request_timeout_secs", config.transport.request_timeout_secs),
    ];
    for (name, value) in fields {
        if value == 0 {
            errors.push(ValidationError::Zero(name));
        }
    }
    if config.admission.max_concurrent == Some(0) {
        errors.push(ValidationError::Zero("admission.max_concurrent"));
    }
}

fn check_upstreams(errors: &mut Vec<ValidationError>, config: &ProxyConfig) {
    let mut seen = HashSet::new();
    for upstream in &config.upstreams {
        if !seen.insert(upstream.name.as_str()) {
            errors.push(ValidationError::DuplicateUpstream(upstream.name.clone()));
        }
        if upstream.addrs.is_empty() {
            errors.push(ValidationError::EmptyUpstream(upstream.name.clone()));
        }
        for addr in &upstream.addrs {
            if !is_host_port(addr) {
                errors.push(ValidationError::InvalidUpstreamAddress {
                    upstream: upstream.name.clone(),
                    addr: addr.clone(),
                });
            }
        }
    }
}

fn check_locations(errors: &mut Vec<ValidationError>, config: &ProxyConfig) {
    let mut seen = HashSet::new();
    for location in &config.locations {
        let path = location.path.as_str();
        let well_formed = path == "/" || (path.len() >= 2 && path.starts_with('/') && path.ends_with('/'));
        if !well_formed {
            errors.push(ValidationError::InvalidLocationPath(path.to_string()));
        }
        if !seen.insert(path) {
            errors.push(ValidationError::DuplicateLocation(path.to_string()));
        }

        match (&location.upstream, &location.root) {
            (Some(upstream), None) => {
                if config.upstream(upstream).is_none() {
                    errors.push(ValidationError::UnknownUpstream {
                        location: path.to_string(),
                        upstream: upstream.clone(),
                    });
                }
            }
            (None, Some(_)) => {}
            _ => errors.push(ValidationError::AmbiguousLocation(path.to_string())),
        }
    }
    if !seen.contains("/") {
        errors.push(ValidationError::MissingRootLocation);
    }
}

/// Accepts `host:port` with a hostname, IPv4 or bracketed IPv6 host.
fn is_host_port(addr: &str) -> bool {
    let explicit_port = addr
        .rsplit_once(':')
        .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
    if !explicit_port {
        return false;
    }
    // Url elides default ports, so only the host and trailing parts are checked here.
    match Url::parse(&format!("http://{}", addr)) {
        Ok(url) => {
            url.host_str().is_some_and(|h| !h.is_empty())
                && url.path() == "/"
                && url.query().is_none()
                && url.username().is_empty()
        }
        Err(_) => false,
    }
}
