//! Response DTOs for the product cache API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::cache::CacheStats;

/// Response body for GET /products/:id
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    /// The requested key
    pub key: String,
    /// The value read through the cache
    pub value: String,
}

impl GetResponse {
    /// Creates a new GetResponse
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Response body for DELETE /products and DELETE /products/:id
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    /// Success message
    pub message: String,
    /// The invalidated key, absent when everything was invalidated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl InvalidateResponse {
    /// Response for a single invalidated key
    pub fn key(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' invalidated", key),
            key: Some(key),
        }
    }

    /// Response for invalidating the whole cache
    pub fn all() -> Self {
        Self {
            message: "All keys invalidated".to_string(),
            key: None,
        }
    }
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of memoized failures served
    pub negative_hits: u64,
    /// Number of source invocations
    pub source_calls: u64,
    /// Number of callers that joined an in-flight call
    pub coalesced: u64,
    /// Number of failed source invocations
    pub failures: u64,
    /// Number of failures answered with a stale value
    pub stale_served: u64,
    /// Number of evictions
    pub evictions: u64,
    /// Current number of entries in cache
    pub total_entries: usize,
    /// Source calls currently outstanding
    pub in_flight: usize,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl From<CacheStats> for StatsResponse {
    fn from(stats: CacheStats) -> Self {
        Self {
            hit_rate: stats.hit_rate(),
            hits: stats.hits,
            misses: stats.misses,
            negative_hits: stats.negative_hits,
            source_calls: stats.source_calls,
            coalesced: stats.coalesced,
            failures: stats.failures,
            stale_served: stats.stale_served,
            evictions: stats.evictions,
            total_entries: stats.total_entries,
            in_flight: stats.in_flight,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    /// Creates a new ErrorResponse
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
