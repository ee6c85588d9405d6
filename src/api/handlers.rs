//! API Handlers
//!
//! HTTP request handlers for each endpoint of the product cache server.

use std::time::Duration;

use axum::{
    extract::{Path, State},
    Json,
};

use crate::cache::CacheProxy;
use crate::config::Config;
use crate::error::Result;
use crate::models::{GetResponse, HealthResponse, InvalidateResponse, StatsResponse};
use crate::source::ProductSource;

/// Application state shared across all handlers.
///
/// The cache is cheap to clone and internally synchronized, so no outer
/// lock is needed.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Read-through cache in front of the product catalogue
    pub cache: CacheProxy<ProductSource>,
}

impl AppState {
    /// Creates a new AppState around an existing cache.
    pub fn new(cache: CacheProxy<ProductSource>) -> Self {
        Self { cache }
    }

    /// Creates a new AppState from configuration.
    ///
    /// Builds the product source and wraps it in a cache using the configured
    /// TTL, capacity and failure policies.
    pub fn from_config(config: &Config) -> Self {
        let source = ProductSource::new(Duration::from_millis(config.source_latency_ms));
        Self::new(CacheProxy::new(source, config.cache_config()))
    }
}

/// Handler for GET /products/:id
///
/// Reads a product through the cache.
pub async fn get_product_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<GetResponse>> {
    let value = state.cache.get(&id).await?;

    Ok(Json(GetResponse::new(id, value)))
}

/// Handler for DELETE /products/:id
///
/// Invalidates one product so the next read goes to the source.
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<InvalidateResponse> {
    state.cache.invalidate(&id);

    Json(InvalidateResponse::key(id))
}

/// Handler for DELETE /products
///
/// Invalidates every cached product.
pub async fn invalidate_all_handler(State(state): State<AppState>) -> Json<InvalidateResponse> {
    state.cache.invalidate_all();

    Json(InvalidateResponse::all())
}

/// Handler for GET /stats
///
/// Returns current cache statistics.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::from(state.cache.stats()))
}

/// Handler for GET /health
///
/// Returns health status of the server.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
