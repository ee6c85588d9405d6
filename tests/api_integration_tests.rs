//! Integration Tests for API Endpoints
//!
//! Tests full request/response cycle for each endpoint.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use readthrough::{api::create_router, source::ProductSource, AppState, CacheConfig, CacheProxy};
use serde_json::Value;
use std::time::Duration;
use tower::ServiceExt;

// == Helper Functions ==

fn create_test_app() -> Router {
    create_router(test_state())
}

fn test_state() -> AppState {
    let source = ProductSource::new(Duration::ZERO);
    let cache = CacheProxy::new(source, CacheConfig::with_ttl(Duration::from_secs(300)));
    AppState::new(cache)
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    (status, body_to_json(response.into_body()).await)
}

// == GET Endpoint Tests ==

#[tokio::test]
async fn test_get_product_success() {
    let app = create_test_app();

    let (status, json) = send(&app, "GET", "/products/101").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["key"], "101");
    assert_eq!(json["value"], "Product-101");
}

#[tokio::test]
async fn test_get_unknown_product_returns_404() {
    let app = create_test_app();

    let (status, json) = send(&app, "GET", "/products/not-a-number").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("not-a-number"));
}

#[tokio::test]
async fn test_repeated_get_hits_cache() {
    let state = test_state();
    let app = create_router(state.clone());

    for _ in 0..3 {
        let (status, _) = send(&app, "GET", "/products/5").await;
        assert_eq!(status, StatusCode::OK);
    }

    assert_eq!(state.cache.source().calls(), 1);

    let (_, stats) = send(&app, "GET", "/stats").await;
    assert_eq!(stats["hits"], 2);
    assert_eq!(stats["misses"], 1);
    assert_eq!(stats["source_calls"], 1);
    assert_eq!(stats["total_entries"], 1);
}

#[tokio::test]
async fn test_concurrent_gets_share_one_source_call() {
    let source = ProductSource::new(Duration::from_millis(50));
    let cache = CacheProxy::new(source, CacheConfig::with_ttl(Duration::from_secs(300)));
    let state = AppState::new(cache);
    let app = create_router(state.clone());

    let requests = (0..10).map(|_| send(&app, "GET", "/products/9"));
    let responses = futures::future::join_all(requests).await;

    for (status, json) in responses {
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["value"], "Product-9");
    }
    assert_eq!(state.cache.source().calls(), 1);
}

// == DELETE Endpoint Tests ==

#[tokio::test]
async fn test_invalidate_forces_refetch() {
    let app = create_test_app();

    send(&app, "GET", "/products/7").await;

    let (status, json) = send(&app, "DELETE", "/products/7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["key"], "7");
    assert!(json["message"].as_str().unwrap().contains('7'));

    send(&app, "GET", "/products/7").await;

    let (_, stats) = send(&app, "GET", "/stats").await;
    assert_eq!(stats["source_calls"], 2);
}

#[tokio::test]
async fn test_invalidate_missing_key_is_ok() {
    let app = create_test_app();

    let (status, _) = send(&app, "DELETE", "/products/never-cached").await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_invalidate_all() {
    let app = create_test_app();

    send(&app, "GET", "/products/1").await;
    send(&app, "GET", "/products/2").await;

    let (status, json) = send(&app, "DELETE", "/products").await;
    assert_eq!(status, StatusCode::OK);
    assert!(json.get("key").is_none());

    let (_, stats) = send(&app, "GET", "/stats").await;
    assert_eq!(stats["total_entries"], 0);
}

// == Stats Endpoint Tests ==

#[tokio::test]
async fn test_stats_fields() {
    let app = create_test_app();

    let (status, json) = send(&app, "GET", "/stats").await;

    assert_eq!(status, StatusCode::OK);
    for field in [
        "hits",
        "misses",
        "negative_hits",
        "source_calls",
        "coalesced",
        "failures",
        "stale_served",
        "evictions",
        "total_entries",
        "in_flight",
        "hit_rate",
    ] {
        assert!(json.get(field).is_some(), "missing field {}", field);
    }
    assert_eq!(json["hit_rate"], 0.0);
}

#[tokio::test]
async fn test_stats_count_failures() {
    let app = create_test_app();

    send(&app, "GET", "/products/bogus").await;

    let (_, json) = send(&app, "GET", "/stats").await;
    assert_eq!(json["failures"], 1);
    assert_eq!(json["total_entries"], 0);
}

// == Health Endpoint Tests ==

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app();

    let (status, json) = send(&app, "GET", "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert!(json.get("timestamp").is_some());
}
