//! Location lookup.
//!
//! # Responsibilities
//! - Resolve configured locations into proxy or static entries
//! - Classify a request path as proxy, static or not-found
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Upstream references resolved once at build time
//! - Explicit NotFound rather than silent default

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::config::ProxyConfig;
use crate::routing::matcher::PrefixTable;

/// A location that forwards to an upstream group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyLocation {
    /// Configured path key.
    pub path: String,
    /// Upstream group name.
    pub upstream: String,
    /// Ordered, non-empty `host:port` list.
    pub addrs: Vec<String>,
}

/// A location served from a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticLocation {
    pub path: String,
    pub root: PathBuf,
    pub index_file: String,
    pub error_file: Option<String>,
}

#[derive(Debug, Clone)]
enum Location {
    Proxy(Arc<ProxyLocation>),
    Static(Arc<StaticLocation>),
}

/// Result of classifying a request path.
#[derive(Debug, Clone)]
pub enum Route {
    Proxy(Arc<ProxyLocation>),
    Static(Arc<StaticLocation>),
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    #[error("no root location `/` configured")]
    MissingRoot,

    #[error("location `{0}` references unknown upstream `{1}`")]
    UnknownUpstream(String, String),

    #[error("location `{0}` is neither a proxy nor a static location")]
    Unresolvable(String),
}

/// Maps request paths to configured locations.
#[derive(Debug)]
pub struct LocationRouter {
    table: PrefixTable<Location>,
}

impl LocationRouter {
    /// Build the router from a validated configuration.
    pub fn from_config(config: &ProxyConfig) -> Result<Self, RouterError> {
        let mut entries = Vec::with_capacity(config.locations.len());

        for loc in &config.locations {
            let location = match (&loc.upstream, &loc.root) {
                (Some(name), _) => {
                    let upstream = config
                        .upstream(name)
                        .filter(|u| !u.addrs.is_empty())
                        .ok_or_else(|| RouterError::UnknownUpstream(loc.path.clone(), name.clone()))?;
                    Location::Proxy(Arc::new(ProxyLocation {
                        path: loc.path.clone(),
                        upstream: upstream.name.clone(),
                        addrs: upstream.addrs.clone(),
                    }))
                }
                (None, Some(root)) => Location::Static(Arc::new(StaticLocation {
                    path: loc.path.clone(),
                    root: PathBuf::from(root),
                    index_file: loc.index_file.clone(),
                    error_file: config.error_file.clone(),
                })),
                (None, None) => return Err(RouterError::Unresolvable(loc.path.clone())),
            };
            entries.push((loc.path.clone(), location));
        }

        let table = PrefixTable::new(entries);
        if !table.contains_key("/") {
            return Err(RouterError::MissingRoot);
        }

        tracing::info!(locations = table.entry_count(), "Location router built");
        Ok(Self { table })
    }

    /// Classify a request path.
    pub fn classify(&self, path: &str) -> Route {
        match self.table.lookup(path) {
            Some((_, Location::Proxy(p))) => Route::Proxy(p.clone()),
            Some((_, Location::Static(s))) => Route::Static(s.clone()),
            None => Route::NotFound,
        }
    }
}
