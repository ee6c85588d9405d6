//! Cache Module
//!
//! Read-through caching with TTL expiration, LRU eviction and single-flight
//! request coalescing.

mod dispatcher;
mod entry;
mod lru;
mod proxy;
mod stats;
mod store;


// Re-export public types
pub use dispatcher::{AbandonPolicy, Commit, Dispatcher};
pub use entry::CacheEntry;
pub use lru::LruTracker;
pub use proxy::CacheProxy;
pub use stats::{CacheStats, StatsRecorder};
pub use store::EntryStore;
