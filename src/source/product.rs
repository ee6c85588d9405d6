//! Simulated remote product catalogue used by the demo server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::{CacheError, Result};
use crate::source::Source;

/// A slow product lookup standing in for a remote service.
///
/// Numeric ids resolve to `Product-{id}` after `latency`; any other id is
/// reported as not found.
#[derive(Debug, Clone)]
pub struct ProductSource {
    latency: Duration,
    calls: Arc<AtomicU64>,
}

impl ProductSource {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of fetches served so far, shared across clones.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Source for ProductSource {
    type Key = String;
    type Value = String;

    async fn fetch(&self, id: &String) -> Result<String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        info!(product_id = %id, "Fetching product from remote catalogue");

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
            return Err(CacheError::not_found(id.clone()));
        }
        Ok(format!("Product-{id}"))
    }

    fn name(&self) -> &'static str {
        "product-catalogue"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_product_source_resolves_numeric_ids() {
        let source = ProductSource::new(Duration::from_secs(1));

        assert_eq!(source.fetch(&"101".to_string()).await, Ok("Product-101".to_string()));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_product_source_rejects_unknown_ids() {
        let source = ProductSource::new(Duration::ZERO);

        let result = source.fetch(&"abc".to_string()).await;
        assert_eq!(result, Err(CacheError::not_found("abc")));
        assert_eq!(source.calls(), 1);
    }
}
