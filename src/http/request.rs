//! Request handling and transformation.
//!
//! # Responsibilities
//! - Derive the client address for forwarding headers
//! - Prepare the outbound header set for the upstream call
//!
//! # Design Decisions
//! - The first `X-Forwarded-For` entry wins over the socket peer address
//! - Hop-by-hop headers and `Host` are never forwarded
//! - `X-Request-ID` is forwarded untouched with the rest of the headers

use std::net::SocketAddr;

use axum::http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue};

use crate::http::response::strip_hop_by_hop;

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// Client IP: first `X-Forwarded-For` entry, else the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let forwarded = headers
        .get(&X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match forwarded {
        Some(ip) => Some(ip.to_string()),
        None => peer.map(|addr| addr.ip().to_string()),
    }
}

/// Protocol the client used to reach the edge.
fn inbound_proto(parts: &Parts) -> String {
    parts
        .headers
        .get(&X_FORWARDED_PROTO)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| parts.uri.scheme_str().map(str::to_string))
        .unwrap_or_else(|| "http".to_string())
}

/// Host the client addressed.
fn inbound_host(parts: &Parts) -> Option<HeaderValue> {
    parts
        .headers
        .get(header::HOST)
        .cloned()
        .or_else(|| parts.uri.authority().and_then(|a| HeaderValue::from_str(a.as_str()).ok()))
}

/// Headers for the outbound request: a cleaned clone of the inbound set
/// plus the standard proxy headers.
pub fn forwarded_headers(parts: &Parts, peer: Option<SocketAddr>) -> HeaderMap {
    let mut headers = parts.headers.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);

    if let Some(ip) = client_ip(&parts.headers, peer).and_then(|ip| HeaderValue::from_str(&ip).ok()) {
        headers.insert(X_FORWARDED_FOR, ip.clone());
        headers.insert(X_REAL_IP, ip);
    }
    if let Ok(proto) = HeaderValue::from_str(&inbound_proto(parts)) {
        headers.insert(X_FORWARDED_PROTO, proto);
    }
    if let Some(host) = inbound_host(parts) {
        headers.insert(X_FORWARDED_HOST, host);
    }
    headers
}
