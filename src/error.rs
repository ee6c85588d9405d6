//! Error types for the read-through cache
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Cache Error Enum ==
/// Unified error type for the cache and its sources.
///
/// Every variant carries an owned message so a single outcome can be cloned
/// out to all callers coalesced on one fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The source could not produce a value (transient or permanent)
    #[error("Source failure: {0}")]
    SourceFailure(String),

    /// The source answered that no such key exists
    #[error("Key not found: {0}")]
    NotFound(String),

    /// A bounded store refused the insertion
    #[error("Capacity error: {0}")]
    CapacityError(String),

    /// The fetch task panicked or was cancelled before it settled
    #[error("Fetch abandoned: {0}")]
    Abandoned(String),
}

impl CacheError {
    /// Shorthand for a [`CacheError::SourceFailure`].
    pub fn source_failure(msg: impl Into<String>) -> Self {
        CacheError::SourceFailure(msg.into())
    }

    /// Shorthand for a [`CacheError::NotFound`].
    pub fn not_found(key: impl Into<String>) -> Self {
        CacheError::NotFound(key.into())
    }

    /// True when the source gave an authoritative "no such key" answer.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::SourceFailure(_) => StatusCode::BAD_GATEWAY,
            CacheError::CapacityError(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Abandoned(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
