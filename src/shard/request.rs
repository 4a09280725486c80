//! The unit of work handed from the HTTP front end to a shard.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{body::Body, http::Request, response::Response};
use tokio::sync::oneshot;

use crate::error::ProxyError;
use crate::routing::ProxyLocation;

/// An admitted request waiting for, or being served by, a shard.
#[derive(Debug)]
pub struct ProxyRequest {
    pub request: Request<Body>,
    pub client_addr: Option<SocketAddr>,
    pub location: Arc<ProxyLocation>,
    pub sink: ResponseSink,
    pub admitted_at: Instant,
}

impl ProxyRequest {
    /// Pair a request with the handle its handler waits on.
    pub fn new(
        request: Request<Body>,
        client_addr: Option<SocketAddr>,
        location: Arc<ProxyLocation>,
    ) -> (Self, ResponseHandle) {
        let (tx, rx) = oneshot::channel();
        let request = Self {
            request,
            client_addr,
            location,
            sink: ResponseSink { tx },
            admitted_at: Instant::now(),
        };
        (request, ResponseHandle { rx })
    }

    /// The client stopped waiting for this request.
    pub fn is_canceled(&self) -> bool {
        self.sink.is_closed()
    }

    /// `METHOD path` for log lines.
    pub fn describe(&self) -> (String, String) {
        (
            self.request.method().to_string(),
            self.request.uri().path().to_string(),
        )
    }
}

/// Write side of the per-request response channel. Consumed by the first
/// response sent, so a request is answered at most once.
#[derive(Debug)]
pub struct ResponseSink {
    tx: oneshot::Sender<Response>,
}

impl ResponseSink {
    /// Deliver the response. `false` if the client already left.
    pub fn send(self, response: Response) -> bool {
        self.tx.send(response).is_ok()
    }

    /// Deliver the status mapped from `error`.
    pub fn fail(self, error: &ProxyError) -> bool {
        self.send(error.to_response())
    }

    /// Resolve once the client stops waiting.
    pub async fn closed(&mut self) {
        self.tx.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Read side held by the HTTP handler. Dropping it is how a client
/// disconnect reaches the shard.
#[derive(Debug)]
pub struct ResponseHandle {
    rx: oneshot::Receiver<Response>,
}

impl ResponseHandle {
    /// Wait for the shard's answer. A sink dropped without answering
    /// becomes a 500.
    pub async fn wait(self) -> Response {
        match self.rx.await {
            Ok(response) => response,
            Err(_) => ProxyError::RequestDropped.to_response(),
        }
    }
}
