//! Readthrough - an in-memory read-through cache
//!
//! Fronts a slow, fallible [`Source`] with TTL expiration, optional LRU
//! eviction and single-flight request coalescing: concurrent misses for the
//! same key share one upstream call.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod source;
pub mod tasks;

pub use api::AppState;
pub use cache::{AbandonPolicy, CacheProxy, CacheStats};
pub use config::{CacheConfig, Config};
pub use error::CacheError;
pub use source::{source_fn, Source};
pub use tasks::spawn_cleanup_task;
