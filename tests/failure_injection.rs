//! Failure injection tests for the reverse proxy.

use std::time::{Duration, Instant};

use axum::http::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

mod common;

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    let live = common::start_mock_backend("alive").await;

    let mut config = common::proxy_config(&["127.0.0.1:1".parse().unwrap()]);
    config.upstreams.push(shard_proxy::config::UpstreamConfig {
        name: "live".into(),
        addrs: vec![live.addr.to_string()],
    });
    config.locations.push(common::proxy_location_config("/live/", "live"));
    let proxy = common::start_proxy(config).await;
    let client = common::client();

    let res = client.get(proxy.url("/anything")).send().await.expect("proxy unreachable");
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);

    // Same single shard keeps serving.
    let res = client.get(proxy.url("/live/ping")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "alive");

    let res = client.get(proxy.url("/again")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);

    proxy.stop().await;
}

#[tokio::test]
async fn test_slow_upstream_is_gateway_timeout() {
    let slow = common::start_programmable_backend(|n| async move {
        if n == 0 {
            tokio::time::sleep(Duration::from_secs(3)).await;
        }
        (200, "late".to_string())
    })
    .await;

    let mut config = common::proxy_config(&[slow.addr]);
    config.transport.request_timeout_secs = 1;
    let proxy = common::start_proxy(config).await;
    let client = common::client();

    let started = Instant::now();
    let res = client.get(proxy.url("/slow")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(started.elapsed() < Duration::from_millis(2500));

    let res = client.get(proxy.url("/fast")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "late");

    proxy.stop().await;
}

#[tokio::test]
async fn test_upstream_error_status_passes_through() {
    let backend = common::start_programmable_backend(|_| async { (503, "maintenance".to_string()) }).await;
    let proxy = common::start_proxy(common::proxy_config(&[backend.addr])).await;

    let res = common::client().get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(res.text().await.unwrap(), "maintenance");
    assert_eq!(backend.hits(), 1);

    proxy.stop().await;
}

#[tokio::test]
async fn test_saturated_shard_times_out_hand_off() {
    let backend = common::start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        (200, "ok".to_string())
    })
    .await;

    let mut config = common::proxy_config(&[backend.addr]);
    config.dispatch.shard_queue_capacity = 1;
    config.dispatch.handoff_timeout_ms = 200;
    let proxy = common::start_proxy(config).await;
    let client = common::client();

    // First request occupies the shard, second fills its queue.
    let first = tokio::spawn(client.get(proxy.url("/a")).send());
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = tokio::spawn(client.get(proxy.url("/b")).send());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let res = client.get(proxy.url("/c")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

    assert_eq!(first.await.unwrap().unwrap().status(), StatusCode::OK);
    assert_eq!(second.await.unwrap().unwrap().status(), StatusCode::OK);
    assert_eq!(backend.hits(), 2);

    proxy.stop().await;
}

#[tokio::test]
async fn test_admission_sheds_excess_load() {
    let backend = common::start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        (200, "ok".to_string())
    })
    .await;

    let mut config = common::proxy_config(&[backend.addr]);
    config.admission.max_concurrent = Some(1);
    let proxy = common::start_proxy(config).await;
    let client = common::client();

    let held = tokio::spawn(client.get(proxy.url("/held")).send());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let res = client.get(proxy.url("/shed")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);

    let held = held.await.unwrap().unwrap();
    assert_eq!(held.status(), StatusCode::OK);
    assert_eq!(held.text().await.unwrap(), "ok");
    assert_eq!(backend.hits(), 1);

    // Capacity is released once the held request finishes.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let res = client.get(proxy.url("/after")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    proxy.stop().await;
}

#[tokio::test]
async fn test_admission_held_while_body_streams() {
    let backend = common::start_trickle_backend(&["a", "b", "c"], Duration::from_millis(400)).await;

    let mut config = common::proxy_config(&[backend.addr]);
    config.admission.max_concurrent = Some(1);
    let proxy = common::start_proxy(config).await;
    let client = common::client();

    // Head arrives before the body has finished streaming.
    let streaming = client.get(proxy.url("/stream")).send().await.unwrap();
    assert_eq!(streaming.status(), StatusCode::OK);

    let res = client.get(proxy.url("/during")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);

    assert_eq!(streaming.text().await.unwrap(), "abc");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let res = client.get(proxy.url("/after")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "abc");
    assert_eq!(backend.hits(), 2);

    proxy.stop().await;
}

#[tokio::test]
async fn test_stalled_tls_handshake_is_bad_gateway() {
    let (addr, accepted) = common::start_silent_listener().await;

    let mut config = common::proxy_config(&[addr]);
    config.transport.upstream_scheme = shard_proxy::config::UpstreamScheme::Https;
    config.transport.connect_timeout_ms = 100;
    config.transport.tls_handshake_timeout_ms = 100;
    config.transport.request_timeout_secs = 5;
    let proxy = common::start_proxy(config).await;

    let started = Instant::now();
    let res = common::client().get(proxy.url("/tls")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(accepted.load(std::sync::atomic::Ordering::SeqCst) >= 1);

    proxy.stop().await;
}

#[tokio::test]
async fn test_slow_upload_is_not_charged_to_upstream() {
    let backend = common::start_mock_backend("received").await;

    let mut config = common::proxy_config(&[backend.addr]);
    config.transport.request_timeout_secs = 1;
    let proxy = common::start_proxy(config).await;

    let mut stream = TcpStream::connect(proxy.addr).await.unwrap();
    let head = format!(
        "POST /upload HTTP/1.1\r\nHost: {}\r\nContent-Length: 6\r\nConnection: close\r\n\r\nabc",
        proxy.addr
    );
    stream.write_all(head.as_bytes()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    stream.write_all(b"def").await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 200"), "unexpected response: {response}");
    assert!(response.ends_with("received"));
    assert_eq!(backend.last_request().unwrap().body, b"abcdef");

    proxy.stop().await;
}
