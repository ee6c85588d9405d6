//! Entry Store Module
//!
//! Key -> entry storage combining a HashMap with LRU tracking and TTL metadata.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::cache::{CacheEntry, LruTracker};
use crate::error::{CacheError, Result};

#[derive(Debug)]
struct StoreInner<K, V> {
    /// Key-value storage
    entries: HashMap<K, Arc<CacheEntry<V>>>,
    /// LRU access tracker
    lru: LruTracker<K>,
    /// Entries removed to make room
    evictions: u64,
}

// == Entry Store ==
/// In-memory holding of the most recent known-good value per key.
///
/// Every operation takes one short lock and never performs I/O. Entries are
/// handed out as `Arc`s and swapped wholesale on refresh, so a reader never
/// observes a half-written entry.
#[derive(Debug)]
pub struct EntryStore<K, V> {
    inner: Mutex<StoreInner<K, V>>,
    /// Maximum number of entries allowed, `None` = unbounded
    max_entries: Option<usize>,
}

impl<K, V> EntryStore<K, V>
where
    K: Eq + Hash + Clone,
{
    // == Constructor ==
    /// Creates a new store, optionally bounded to `max_entries`.
    pub fn new(max_entries: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                entries: HashMap::new(),
                lru: LruTracker::new(),
                evictions: 0,
            }),
            max_entries,
        }
    }

    // == Get ==
    /// Looks up the entry for `key`, fresh or not.
    ///
    /// This is a pure read: recency is only updated through [`EntryStore::touch`].
    pub fn get(&self, key: &K) -> Option<Arc<CacheEntry<V>>> {
        self.inner.lock().entries.get(key).cloned()
    }

    // == Touch ==
    /// Marks `key` as most recently used if it is present.
    pub fn touch(&self, key: &K) {
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(key) {
            inner.lru.touch(key);
        }
    }

    // == Put ==
    /// Inserts or replaces the entry for `key`, expiring `ttl` from now.
    ///
    /// Replacing an existing key never evicts. Inserting a new key into a full
    /// store evicts the least recently used entry first.
    pub fn put(&self, key: K, value: V, ttl: Duration) -> Result<()> {
        let entry = Arc::new(CacheEntry::new(value, Instant::now(), ttl));
        let mut inner = self.inner.lock();

        if let Some(max) = self.max_entries {
            if max == 0 {
                return Err(CacheError::CapacityError(
                    "Store is configured with zero capacity".to_string(),
                ));
            }

            let is_overwrite = inner.entries.contains_key(&key);
            while !is_overwrite && inner.entries.len() >= max {
                match inner.lru.evict_oldest() {
                    Some(evicted) => {
                        inner.entries.remove(&evicted);
                        inner.evictions += 1;
                        debug!("LRU eviction to make room for a new entry");
                    }
                    None => {
                        return Err(CacheError::CapacityError(
                            "Store is full and eviction failed".to_string(),
                        ));
                    }
                }
            }
        }

        inner.lru.touch(&key);
        inner.entries.insert(key, entry);
        Ok(())
    }

    // == Evict ==
    /// Removes the entry for `key`. Returns whether one was present.
    pub fn evict(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.entries.remove(key).is_some();
        if removed {
            inner.lru.remove(key);
        }
        removed
    }

    // == Clear ==
    /// Removes every entry. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.entries.len();
        inner.entries.clear();
        inner.lru.clear();
        count
    }

    // == Purge Expired ==
    /// Removes entries that have been stale for at least `grace` at `now`.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&self, now: Instant, grace: Duration) -> usize {
        let mut inner = self.inner.lock();
        let expired: Vec<K> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now) && entry.stale_for(now) >= grace)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            inner.entries.remove(key);
            inner.lru.remove(key);
        }
        expired.len()
    }

    // == Length ==
    /// Returns the current number of entries, fresh or stale.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Total number of capacity-driven evictions so far.
    pub fn evictions(&self) -> u64 {
        self.inner.lock().evictions
    }

    pub fn max_entries(&self) -> Option<usize> {
        self.max_entries
    }
}
