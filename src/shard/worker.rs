//! A single shard: serial consumer of its private queue.
//!
//! # Responsibilities
//! - Pick the upstream address for each request (per-group cursors)
//! - Forward with proxy headers under one deadline per request
//! - Stream the upstream body back and answer the request exactly once
//!
//! # Design Decisions
//! - One request at a time; parallelism comes from the number of shards
//! - Client cancellation is raced at every await in the upstream exchange
//! - The abort signal only fires after the drain deadline has passed
//! - Failed body copies are logged, never retried

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    http::{request::Parts, Request, StatusCode},
    response::Response,
};
use futures_util::stream;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

use crate::config::LoadBalancingAlgorithm;
use crate::error::ProxyError;
use crate::http::request::forwarded_headers;
use crate::http::response::strip_hop_by_hop;
use crate::lifecycle::ShutdownSignal;
use crate::load_balancer::{self, LoadBalancer, SelectorError};
use crate::net::{HostPermit, UpstreamTransport};
use crate::observability::metrics;
use crate::routing::ProxyLocation;
use crate::shard::errors::ErrorReporter;
use crate::shard::request::{ProxyRequest, ResponseSink};

/// Body chunks buffered between the shard and the client connection are
/// bounded by the configured buffer size, assuming a nominal chunk size.
const NOMINAL_CHUNK_BYTES: usize = 4096;

/// Per-shard settings copied out of the configuration.
#[derive(Debug, Clone, Copy)]
pub struct ShardSettings {
    pub algorithm: LoadBalancingAlgorithm,
    pub buffer_size: usize,
    pub max_body_bytes: usize,
}

/// One worker with its own queue, transport and cursors.
#[derive(Debug)]
pub struct Shard {
    id: usize,
    queue: mpsc::Receiver<ProxyRequest>,
    transport: Arc<UpstreamTransport>,
    selectors: HashMap<String, Box<dyn LoadBalancer>>,
    settings: ShardSettings,
    errors: ErrorReporter,
}

impl Shard {
    pub fn new(
        id: usize,
        queue: mpsc::Receiver<ProxyRequest>,
        transport: Arc<UpstreamTransport>,
        settings: ShardSettings,
        errors: ErrorReporter,
    ) -> Self {
        Self {
            id,
            queue,
            transport,
            selectors: HashMap::new(),
            settings,
            errors,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Process requests until the queue closes or `abort` fires.
    pub async fn run(mut self, abort: ShutdownSignal) {
        tracing::debug!(shard = self.id, "Shard started");
        loop {
            let request = tokio::select! {
                biased;
                _ = abort.cancelled() => {
                    tracing::warn!(shard = self.id, "Shard aborted");
                    break;
                }
                next = self.queue.recv() => match next {
                    Some(request) => request,
                    None => break,
                },
            };
            self.process(request, &abort).await;
        }

        // Anything still queued is answered rather than silently dropped.
        self.queue.close();
        while let Ok(request) = self.queue.try_recv() {
            let (method, path) = request.describe();
            let error = ProxyError::ShuttingDown;
            request.sink.fail(&error);
            self.errors.report(Some(self.id), &method, &path, error);
        }
        tracing::debug!(shard = self.id, "Shard stopped");
    }

    async fn process(&mut self, request: ProxyRequest, abort: &ShutdownSignal) {
        let (method, path) = request.describe();

        if request.is_canceled() {
            tracing::debug!(shard = self.id, method = %method, path = %path, "Client gone before upstream call");
            self.errors.report(Some(self.id), &method, &path, ProxyError::ClientCanceled);
            return;
        }

        let ProxyRequest {
            request,
            client_addr,
            location,
            mut sink,
            admitted_at,
        } = request;

        // The upload is the client's time, not the upstream's.
        let (parts, body) = match self.read_body(request, &mut sink, abort).await {
            Ok(read) => read,
            Err(error) => {
                sink.fail(&error);
                self.errors.report(Some(self.id), &method, &path, error);
                return;
            }
        };

        let addr = match self.pick_address(&location) {
            Ok(addr) => addr,
            Err(e) => {
                let error = ProxyError::from(e);
                sink.fail(&error);
                self.errors.report(Some(self.id), &method, &path, error);
                return;
            }
        };

        let started = Instant::now();
        let deadline = started + self.transport.request_timeout();

        let status = match self.forward(&parts, body, client_addr, &addr, &mut sink, abort, deadline).await {
            Ok((upstream, permit)) => {
                let status = self.relay(upstream, sink, &addr, abort, deadline).await;
                drop(permit);
                status
            }
            Err(error) => {
                let status = error.status();
                sink.fail(&error);
                self.errors.report(Some(self.id), &method, &path, error);
                status
            }
        };

        tracing::info!(
            shard = self.id,
            method = %method,
            path = %path,
            upstream = %addr,
            status = status.as_u16(),
            duration_ms = started.elapsed().as_millis() as u64,
            queued_ms = started.duration_since(Instant::from_std(admitted_at)).as_millis() as u64,
            "Request proxied"
        );
        metrics::record_request(&method, status.as_u16(), &addr, admitted_at);
    }

    /// Next address for the location's upstream group.
    fn pick_address(&mut self, location: &ProxyLocation) -> Result<String, SelectorError> {
        if let [only] = location.addrs.as_slice() {
            return Ok(only.clone());
        }

        let selector = match self.selectors.entry(location.upstream.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                entry.insert(load_balancer::build(self.settings.algorithm, location.addrs.len())?)
            }
        };
        Ok(location.addrs[selector.next_index() % location.addrs.len()].clone())
    }

    /// Buffer the inbound body up to the configured limit.
    async fn read_body(
        &self,
        request: Request<Body>,
        sink: &mut ResponseSink,
        abort: &ShutdownSignal,
    ) -> Result<(Parts, Bytes), ProxyError> {
        let (parts, body) = request.into_parts();
        tokio::select! {
            biased;
            _ = abort.cancelled() => Err(ProxyError::ShuttingDown),
            _ = sink.closed() => Err(ProxyError::ClientCanceled),
            body = axum::body::to_bytes(body, self.settings.max_body_bytes) => body
                .map(|body| (parts, body))
                .map_err(|e| ProxyError::RequestBody(e.to_string())),
        }
    }

    /// Send the request upstream and wait for response headers.
    #[allow(clippy::too_many_arguments)]
    async fn forward(
        &self,
        parts: &Parts,
        body: Bytes,
        client_addr: Option<SocketAddr>,
        addr: &str,
        sink: &mut ResponseSink,
        abort: &ShutdownSignal,
        deadline: Instant,
    ) -> Result<(reqwest::Response, HostPermit), ProxyError> {
        let started = Instant::now();

        let exchange = async {
            let url = self.transport.target_url(addr, &parts.uri)?;
            let outbound = self
                .transport
                .client()
                .request(parts.method.clone(), url)
                .headers(forwarded_headers(parts, client_addr))
                .body(body)
                .build()
                .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;

            let permit = self.transport.acquire(addr).await?;
            let response = self
                .transport
                .client()
                .execute(outbound)
                .await
                .map_err(|e| upstream_error(addr, &e, started))?;
            Ok::<_, ProxyError>((response, permit))
        };

        tokio::select! {
            biased;
            _ = abort.cancelled() => Err(ProxyError::ShuttingDown),
            _ = sink.closed() => Err(ProxyError::ClientCanceled),
            result = timeout_at(deadline, exchange) => match result {
                Ok(result) => result,
                Err(_) => Err(ProxyError::UpstreamTimeout {
                    upstream: addr.to_string(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }),
            },
        }
    }

    /// Write the upstream head to the client, then copy the body.
    async fn relay(
        &self,
        upstream: reqwest::Response,
        sink: ResponseSink,
        addr: &str,
        abort: &ShutdownSignal,
        deadline: Instant,
    ) -> StatusCode {
        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);

        let capacity = (self.settings.buffer_size / NOMINAL_CHUNK_BYTES).max(1);
        let (tx, rx) = mpsc::channel::<Result<Bytes, io::Error>>(capacity);
        let body = Body::from_stream(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        }));

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;

        if !sink.send(response) {
            tracing::debug!(shard = self.id, upstream = %addr, "Client gone before response head");
            return status;
        }

        self.copy_body(upstream, tx, addr, abort, deadline).await;
        status
    }

    async fn copy_body(
        &self,
        mut upstream: reqwest::Response,
        tx: mpsc::Sender<Result<Bytes, io::Error>>,
        addr: &str,
        abort: &ShutdownSignal,
        deadline: Instant,
    ) {
        loop {
            let next = tokio::select! {
                biased;
                _ = abort.cancelled() => {
                    tracing::warn!(shard = self.id, upstream = %addr, "Response body abandoned at shutdown");
                    let _ = tx.try_send(Err(io::Error::other("proxy shutting down")));
                    return;
                }
                _ = tx.closed() => {
                    tracing::debug!(shard = self.id, upstream = %addr, "Client gone during response body");
                    return;
                }
                next = timeout_at(deadline, upstream.chunk()) => next,
            };

            let chunk = match next {
                Ok(Ok(Some(chunk))) => chunk,
                Ok(Ok(None)) => return,
                Ok(Err(e)) => {
                    tracing::warn!(shard = self.id, upstream = %addr, error = %e, "Response body copy failed");
                    let _ = tx.try_send(Err(io::Error::other(e)));
                    return;
                }
                Err(_) => {
                    tracing::warn!(shard = self.id, upstream = %addr, "Response body exceeded upstream deadline");
                    let _ = tx.try_send(Err(io::Error::new(io::ErrorKind::TimedOut, "upstream body timed out")));
                    return;
                }
            };

            let delivered = tokio::select! {
                biased;
                _ = abort.cancelled() => false,
                sent = tx.send(Ok(chunk)) => sent.is_ok(),
            };
            if !delivered {
                return;
            }
        }
    }
}

/// Map a transport failure to the client-facing error. Connect, TLS and DNS
/// failures are 502 even when they expired on the connect budget.
fn upstream_error(addr: &str, error: &reqwest::Error, started: Instant) -> ProxyError {
    if error.is_timeout() && !error.is_connect() {
        return ProxyError::UpstreamTimeout {
            upstream: addr.to_string(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
    }

    let mut reason = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        reason.push_str(": ");
        reason.push_str(&cause.to_string());
        source = cause.source();
    }
    ProxyError::UpstreamUnavailable {
        upstream: addr.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;

    fn shard(algorithm: LoadBalancingAlgorithm) -> Shard {
        let (_tx, rx) = mpsc::channel(1);
        let (errors, _events) = ErrorReporter::channel(8);
        let transport = Arc::new(UpstreamTransport::new(&TransportConfig::default()).unwrap());
        let settings = ShardSettings {
            algorithm,
            buffer_size: 8192,
            max_body_bytes: 1024,
        };
        Shard::new(0, rx, transport, settings, errors)
    }

    fn location(upstream: &str, addrs: &[&str]) -> ProxyLocation {
        ProxyLocation {
            path: "/api/".into(),
            upstream: upstream.into(),
            addrs: addrs.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[test]
    fn test_single_address_skips_cursor() {
        let mut shard = shard(LoadBalancingAlgorithm::RoundRobin);
        let loc = location("solo", &["10.0.0.1:80"]);
        for _ in 0..3 {
            assert_eq!(shard.pick_address(&loc).unwrap(), "10.0.0.1:80");
        }
        assert!(shard.selectors.is_empty());
    }

    #[test]
    fn test_addresses_rotate_per_group() {
        let mut shard = shard(LoadBalancingAlgorithm::RoundRobin);
        let a = location("a", &["a1:80", "a2:80"]);
        let b = location("b", &["b1:80", "b2:80", "b3:80"]);

        let picks: Vec<String> = (0..4).map(|_| shard.pick_address(&a).unwrap()).collect();
        assert_eq!(picks, ["a1:80", "a2:80", "a1:80", "a2:80"]);

        assert_eq!(shard.pick_address(&b).unwrap(), "b1:80");
        assert_eq!(shard.pick_address(&b).unwrap(), "b2:80");
        assert_eq!(shard.pick_address(&a).unwrap(), "a1:80");
        assert_eq!(shard.selectors.len(), 2);
    }

    #[test]
    fn test_unimplemented_algorithm_is_an_error() {
        let mut shard = shard(LoadBalancingAlgorithm::LeastConn);
        let loc = location("a", &["a1:80", "a2:80"]);
        assert!(matches!(
            shard.pick_address(&loc),
            Err(SelectorError::Unsupported(LoadBalancingAlgorithm::LeastConn))
        ));
    }
}
