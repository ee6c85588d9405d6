//! Cache Proxy Module
//!
//! The public read-through contract: serve fresh entries from the store and
//! route everything else through the coalescing dispatcher to the source.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{AbandonPolicy, CacheStats, Dispatcher, EntryStore, StatsRecorder};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::source::Source;

struct Inner<S: Source> {
    source: S,
    /// Known-good values
    store: EntryStore<S::Key, S::Value>,
    /// Memoized failures, only written when `cache_errors` is on
    negative: EntryStore<S::Key, CacheError>,
    dispatcher: Dispatcher<S::Key, S::Value>,
    config: CacheConfig,
    stats: StatsRecorder,
}

impl<S: Source> Inner<S> {
    fn fresh_value(&self, key: &S::Key, now: Instant) -> Option<S::Value> {
        self.store
            .get(key)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| entry.value.clone())
    }

    fn stale_value(&self, key: &S::Key, window: Duration, now: Instant) -> Option<S::Value> {
        self.store
            .get(key)
            .filter(|entry| entry.stale_for(now) <= window)
            .map(|entry| entry.value.clone())
    }

    /// Writes a settled outcome. Runs while the request is still registered.
    fn commit(&self, key: S::Key, outcome: &Result<S::Value>) {
        match outcome {
            Ok(value) => {
                self.negative.evict(&key);
                match self.store.put(key.clone(), value.clone(), self.config.ttl) {
                    Ok(()) => info!(?key, "Committed fetched value"),
                    Err(e) => warn!(?key, error = %e, "Fetched value could not be stored"),
                }
            }
            Err(e) if self.config.cache_errors => {
                if let Err(e) = self.negative.put(key, e.clone(), self.config.negative_ttl) {
                    warn!(error = %e, "Failure could not be memoized");
                }
            }
            Err(_) => {}
        }
    }
}

// == Cache Proxy ==
/// A read-through cache in front of a [`Source`].
///
/// Cloning is cheap and every clone shares the same store, in-flight table and
/// statistics. Concurrent `get`s for a missing or expired key result in a
/// single source call whose outcome every caller receives.
pub struct CacheProxy<S: Source> {
    inner: Arc<Inner<S>>,
}

impl<S: Source> Clone for CacheProxy<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Source> fmt::Debug for CacheProxy<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheProxy")
            .field("source", &self.inner.source.name())
            .field("config", &self.inner.config)
            .field("entries", &self.inner.store.len())
            .finish()
    }
}

impl<S: Source> CacheProxy<S> {
    // == Constructor ==
    pub fn new(source: S, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                store: EntryStore::new(config.max_entries),
                negative: EntryStore::new(config.max_entries),
                dispatcher: Dispatcher::new(config.abandon),
                config,
                stats: StatsRecorder::new(),
            }),
        }
    }

    // == Get ==
    /// Returns the value for `key`, fetching it from the source when there is
    /// no fresh entry.
    ///
    /// Failures are propagated as-is and leave the store untouched. With
    /// `stale_if_error` set, a failure other than `NotFound` is answered
    /// with a recently expired value if one exists.
    pub async fn get(&self, key: &S::Key) -> Result<S::Value> {
        let inner = &self.inner;
        let now = Instant::now();

        if let Some(value) = inner.fresh_value(key, now) {
            inner.store.touch(key);
            inner.stats.record_hit();
            debug!(?key, "Cache hit");
            return Ok(value);
        }

        if inner.config.cache_errors {
            if let Some(failure) = inner.negative.get(key).filter(|e| e.is_fresh(now)) {
                inner.stats.record_negative_hit();
                debug!(?key, "Memoized failure hit");
                return Err(failure.value.clone());
            }
        }

        inner.stats.record_miss();
        debug!(?key, "Cache miss");

        let fetch = {
            let inner = Arc::clone(inner);
            let key = key.clone();
            async move {
                inner.stats.record_source_call();
                info!(?key, source = inner.source.name(), "Fetching from source");

                let outcome = inner.source.fetch(&key).await;
                if let Err(e) = &outcome {
                    inner.stats.record_failure();
                    warn!(?key, error = %e, "Source fetch failed");
                }
                outcome
            }
        };
        let commit = {
            let inner = Arc::clone(inner);
            let key = key.clone();
            move |outcome: &Result<S::Value>| inner.commit(key, outcome)
        };

        let outcome = inner
            .dispatcher
            .fetch_once(
                key.clone(),
                || inner.fresh_value(key, Instant::now()),
                fetch,
                commit,
            )
            .await;

        match outcome {
            Err(e) if !e.is_not_found() => {
                let Some(window) = inner.config.stale_if_error else {
                    return Err(e);
                };
                match inner.stale_value(key, window, Instant::now()) {
                    Some(value) => {
                        inner.stats.record_stale_served();
                        warn!(?key, error = %e, "Serving stale value after source failure");
                        Ok(value)
                    }
                    None => Err(e),
                }
            }
            other => other,
        }
    }

    // == Invalidate ==
    /// Forces the next `get` for `key` to go to the source.
    ///
    /// A fetch already in flight for `key` still answers its current callers
    /// but its result is not stored.
    pub fn invalidate(&self, key: &S::Key) {
        let inner = &self.inner;
        let detached = inner.dispatcher.forget(key);
        let removed = inner.store.evict(key);
        inner.negative.evict(key);
        info!(?key, removed, detached, "Invalidated key");
    }

    // == Invalidate All ==
    /// Drops every entry and detaches every in-flight fetch.
    pub fn invalidate_all(&self) {
        let inner = &self.inner;
        let detached = inner.dispatcher.forget_all();
        let removed = inner.store.clear();
        inner.negative.clear();
        info!(removed, detached, "Invalidated all keys");
    }

    // == Purge Expired ==
    /// Removes entries that can no longer be served.
    ///
    /// With `stale_if_error` set, values are kept for that window past expiry.
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let inner = &self.inner;
        let now = Instant::now();
        let grace = inner.config.stale_if_error.unwrap_or(Duration::ZERO);

        let purged = inner.store.purge_expired(now, grace);
        purged + inner.negative.purge_expired(now, Duration::ZERO)
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let inner = &self.inner;
        CacheStats {
            coalesced: inner.dispatcher.coalesced(),
            evictions: inner.store.evictions(),
            total_entries: inner.store.len(),
            in_flight: inner.dispatcher.in_flight(),
            ..inner.stats.snapshot()
        }
    }

    /// Number of stored values, fresh or stale.
    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    /// Number of source calls currently outstanding.
    pub fn in_flight(&self) -> usize {
        self.inner.dispatcher.in_flight()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn abandon_policy(&self) -> AbandonPolicy {
        self.inner.dispatcher.abandon_policy()
    }

    pub fn source(&self) -> &S {
        &self.inner.source
    }
}
