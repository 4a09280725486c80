//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use shard_proxy::config::{LocationConfig, ProxyConfig, UpstreamConfig, UpstreamScheme};
use shard_proxy::http::HttpServer;
use shard_proxy::lifecycle::Shutdown;
use shard_proxy::routing::ProxyLocation;

/// One request as the mock upstream saw it.
#[derive(Debug, Clone)]
pub struct Captured {
    /// Request line and headers, lower-cased.
    pub head: String,
    pub body: Vec<u8>,
}

/// A running mock upstream.
pub struct MockUpstream {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
    pub requests: Arc<Mutex<Vec<Captured>>>,
}

impl MockUpstream {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<Captured> {
        self.requests.lock().unwrap().last().cloned()
    }
}

/// Start a mock upstream that always answers 200 with `body`.
pub async fn start_mock_backend(body: &'static str) -> MockUpstream {
    start_programmable_backend(move |_| async move { (200, body.to_string()) }).await
}

/// Start a programmable mock upstream. `f` receives the zero-based request
/// number and returns the status and body to send.
pub async fn start_programmable_backend<F, Fut>(f: F) -> MockUpstream
where
    F: Fn(usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));
    let f = Arc::new(f);

    let (task_hits, task_requests) = (hits.clone(), requests.clone());
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            let hits = task_hits.clone();
            let requests = task_requests.clone();
            tokio::spawn(async move {
                let Some(captured) = read_request(&mut socket).await else {
                    return;
                };
                let n = hits.fetch_add(1, Ordering::SeqCst);
                requests.lock().unwrap().push(captured);

                let (status, body) = f(n).await;
                let reason = StatusCode::from_u16(status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("OK");
                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    MockUpstream { addr, hits, requests }
}

/// Start an upstream that sends its head at once and then each of `chunks`
/// after `gap`, with a fixed `Content-Length`.
pub async fn start_trickle_backend(chunks: &'static [&'static str], gap: Duration) -> MockUpstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));

    let (task_hits, task_requests) = (hits.clone(), requests.clone());
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let hits = task_hits.clone();
            let requests = task_requests.clone();
            tokio::spawn(async move {
                let Some(captured) = read_request(&mut socket).await else {
                    return;
                };
                hits.fetch_add(1, Ordering::SeqCst);
                requests.lock().unwrap().push(captured);

                let length: usize = chunks.iter().map(|c| c.len()).sum();
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    length
                );
                if socket.write_all(head.as_bytes()).await.is_err() {
                    return;
                }
                for chunk in chunks {
                    tokio::time::sleep(gap).await;
                    if socket.write_all(chunk.as_bytes()).await.is_err() {
                        return;
                    }
                }
                let _ = socket.shutdown().await;
            });
        }
    });

    MockUpstream { addr, hits, requests }
}

/// Accept TCP connections and never write a byte back. Returns the address
/// and the number of accepted connections.
pub async fn start_silent_listener() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = accepted.clone();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            held.push(socket);
        }
    });

    (addr, accepted)
}

async fn read_request(socket: &mut TcpStream) -> Option<Captured> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim() == "content-length")
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < head_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Some(Captured {
        head,
        body: buf[head_end..].to_vec(),
    })
}

/// Config with `/` proxied to one upstream group over plain HTTP.
pub fn proxy_config(addrs: &[SocketAddr]) -> ProxyConfig {
    let mut config = ProxyConfig {
        shard_count: 1,
        upstreams: vec![UpstreamConfig {
            name: "backend".into(),
            addrs: addrs.iter().map(ToString::to_string).collect(),
        }],
        locations: vec![proxy_location_config("/", "backend")],
        ..ProxyConfig::default()
    };
    config.transport.upstream_scheme = UpstreamScheme::Http;
    // Admission defaults to the shard count; tests that exercise it set their own.
    config.admission.max_concurrent = Some(64);
    config
}

pub fn proxy_location_config(path: &str, upstream: &str) -> LocationConfig {
    LocationConfig {
        path: path.into(),
        upstream: Some(upstream.into()),
        root: None,
        index_file: "index.html".into(),
    }
}

/// A location value for driving the shard pool directly.
pub fn location(addrs: &[SocketAddr]) -> Arc<ProxyLocation> {
    Arc::new(ProxyLocation {
        path: "/".into(),
        upstream: "backend".into(),
        addrs: addrs.iter().map(ToString::to_string).collect(),
    })
}

pub fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

/// A proxy serving on an ephemeral port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Arc<Shutdown>,
    pub task: JoinHandle<()>,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the server to return.
    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(10), self.task).await;
    }
}

pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Arc::new(Shutdown::new());
    let server = HttpServer::new(Arc::new(config)).unwrap();
    let signal = shutdown.subscribe();

    let task = tokio::spawn(async move {
        let _ = server.run(listener, signal).await;
    });

    TestProxy { addr, shutdown, task }
}

/// Client that never pools, so every request opens a fresh connection.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
