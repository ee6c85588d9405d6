//! API Routes
//!
//! Configures the Axum router with all product cache endpoints.

use axum::{
    routing::{delete, get},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    get_product_handler, health_handler, invalidate_all_handler, invalidate_handler,
    stats_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /products/:id` - Read a product through the cache
/// - `DELETE /products/:id` - Invalidate one product
/// - `DELETE /products` - Invalidate every product
/// - `GET /stats` - Get cache statistics
/// - `GET /health` - Health check endpoint
///
/// # Middleware
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/products", delete(invalidate_all_handler))
        .route(
            "/products/:id",
            get(get_product_handler).delete(invalidate_handler),
        )
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheProxy;
    use crate::config::CacheConfig;
    use crate::source::ProductSource;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::time::Duration;
    use tower::util::ServiceExt;

    fn create_test_app() -> Router {
        let source = ProductSource::new(Duration::ZERO);
        let cache = CacheProxy::new(source, CacheConfig::with_ttl(Duration::from_secs(60)));
        create_router(AppState::new(cache))
    }

    async fn status_of(app: Router, method: &str, uri: &str) -> StatusCode {
        app.oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        assert_eq!(status_of(create_test_app(), "GET", "/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        assert_eq!(status_of(create_test_app(), "GET", "/stats").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_get_product_endpoint() {
        assert_eq!(
            status_of(create_test_app(), "GET", "/products/101").await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn test_get_not_found() {
        assert_eq!(
            status_of(create_test_app(), "GET", "/products/unknown").await,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_invalidate_endpoints() {
        assert_eq!(
            status_of(create_test_app(), "DELETE", "/products/101").await,
            StatusCode::OK
        );
        assert_eq!(
            status_of(create_test_app(), "DELETE", "/products").await,
            StatusCode::OK
        );
    }
}
