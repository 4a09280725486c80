//! Request-path error taxonomy.
//!
//! Every per-request failure is resolved to exactly one HTTP status at the
//! point where it is detected. None of these errors terminate a shard or the
//! process; only configuration errors at startup are fatal.

use axum::{
    body::Body,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::config::ConfigError;
use crate::load_balancer::SelectorError;
use crate::net::TransportError;
use crate::routing::RouterError;

/// Errors produced while admitting, routing, dispatching or proxying a request.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Admission capacity exhausted.
    #[error("server is busy, try again")]
    AdmissionRejected,

    /// No configured location matches the request path.
    #[error("no location matches path {0}")]
    RouteNotFound(String),

    /// Connect, DNS or TLS failure, or a broken upstream response.
    #[error("upstream {upstream} unavailable: {reason}")]
    UpstreamUnavailable { upstream: String, reason: String },

    /// Upstream call exceeded its bound.
    #[error("upstream {upstream} timed out after {elapsed_ms}ms")]
    UpstreamTimeout { upstream: String, elapsed_ms: u64 },

    /// The originating client went away.
    #[error("client canceled the request")]
    ClientCanceled,

    /// Hand-off to a shard did not complete in time.
    #[error("no shard accepted the request within {0}ms")]
    DispatchTimeout(u64),

    /// The dispatch queue is closed because shutdown has begun.
    #[error("proxy is shutting down")]
    ShuttingDown,

    /// The request was dropped before any response was produced.
    #[error("request dropped before completion")]
    RequestDropped,

    /// The inbound body could not be read or exceeded the size cap.
    #[error("unreadable request body: {0}")]
    RequestBody(String),

    /// Outbound request could not be constructed.
    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),

    /// Best-effort drain did not finish before the deadline.
    #[error("shutdown deadline of {0}s exceeded")]
    ShutdownDeadlineExceeded(u64),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Routing(#[from] RouterError),

    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ProxyError {
    /// HTTP status reported to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::AdmissionRejected => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::ClientCanceled => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::RequestBody(_) => StatusCode::BAD_REQUEST,
            ProxyError::DispatchTimeout(_)
            | ProxyError::RequestDropped
            | ProxyError::InvalidRequest(_)
            | ProxyError::ShutdownDeadlineExceeded(_)
            | ProxyError::Config(_)
            | ProxyError::Routing(_)
            | ProxyError::Selector(_)
            | ProxyError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short body text written alongside the status.
    fn client_message(&self) -> &'static str {
        match self.status() {
            StatusCode::TOO_MANY_REQUESTS => "server is busy, try again",
            StatusCode::NOT_FOUND => "Not Found",
            StatusCode::BAD_REQUEST => "Bad Request",
            StatusCode::BAD_GATEWAY => "Bad Gateway",
            StatusCode::GATEWAY_TIMEOUT => "Gateway Timeout",
            StatusCode::SERVICE_UNAVAILABLE => "Service Unavailable",
            _ => "Internal Server Error",
        }
    }

    /// Build the client-facing response without consuming the error.
    pub fn to_response(&self) -> Response {
        let mut response = Response::new(Body::from(self.client_message()));
        *response.status_mut() = self.status();
        response
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        self.to_response()
    }
}
