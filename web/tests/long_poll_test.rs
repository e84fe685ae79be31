//! Conditional reads and `Prefer: wait` long polling through the dispatcher.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use bytes::Bytes;
use http::{Method, Response, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use svchost_runtime::ServiceRegistry;
use svchost_testing::fixtures::{ClockService, CounterService};
use svchost_testing::helpers::{get, request};
use svchost_web::{CoreConfig, HostConfig, HostServer, RequestDispatcher};
use tokio::time::Instant;

fn counter_host() -> (Arc<RequestDispatcher>, Arc<CounterService>) {
    let registry = Arc::new(ServiceRegistry::new());
    let counter = Arc::new(CounterService::new(Arc::new(ClockService::fixed_default())));
    registry.register_instance(Arc::clone(&counter));

    let host = HostConfig::new()
        .with_core(CoreConfig::new().with_long_poll_interval(Duration::from_millis(100)));
    let server =
        HostServer::from_config_with(registry, &json!({"listen": "CounterService"}), host).unwrap();
    (Arc::clone(server.dispatcher()), counter)
}

fn etag(response: &Response<Bytes>) -> String {
    response.headers()["etag"].to_str().unwrap().to_string()
}

async fn wait_for_change(
    dispatcher: &RequestDispatcher,
    etag: &str,
    prefer: &str,
) -> Response<Bytes> {
    let ctx = request(Method::GET, "/")
        .header("if-none-match", etag)
        .header("prefer", prefer)
        .build();
    dispatcher.dispatch(ctx).await
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn test_long_poll_returns_when_content_changes() {
    let (dispatcher, counter) = counter_host();
    let first = dispatcher.dispatch(get("/")).await;
    let tag = etag(&first);

    let mutator = Arc::clone(&counter);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        mutator.add(5);
    });

    let started = Instant::now();
    let response = wait_for_change(&dispatcher, &tag, "wait=10").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_ne!(etag(&response), tag);
    assert!(started.elapsed() < Duration::from_secs(1));

    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["count"], 5);
    assert_eq!(body["$hash"], etag(&response).as_str());
}

#[tokio::test(start_paused = true)]
async fn test_long_poll_times_out_with_304() {
    let (dispatcher, _counter) = counter_host();
    let tag = etag(&dispatcher.dispatch(get("/")).await);

    let started = Instant::now();
    let response = wait_for_change(&dispatcher, &tag, "respond-async, wait=1").await;

    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert!(response.body().is_empty());
    assert_eq!(etag(&response), tag);
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_without_prefer_wait_304_is_immediate() {
    let (dispatcher, _counter) = counter_host();
    let tag = etag(&dispatcher.dispatch(get("/")).await);

    let started = Instant::now();
    let ctx = request(Method::GET, "/").header("if-none-match", &tag).build();
    let response = dispatcher.dispatch(ctx).await;

    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test]
async fn test_stale_etag_gets_fresh_content() {
    let (dispatcher, counter) = counter_host();
    let tag = etag(&dispatcher.dispatch(get("/")).await);
    counter.add(1);

    let response = wait_for_change(&dispatcher, &format!("W/\"{tag}\""), "wait=5").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_ne!(etag(&response), tag);
}

#[tokio::test]
async fn test_calls_are_never_cached() {
    let (dispatcher, _counter) = counter_host();
    let ctx = request(Method::POST, "/increment").build();
    let response = dispatcher.dispatch(ctx).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["payload"], 1);
    assert!(response.headers().get("etag").is_none());
    assert!(response.headers().get("access-control-allow-origin").is_some());
}
