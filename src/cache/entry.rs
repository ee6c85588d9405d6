//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use std::time::Duration;

use tokio::time::Instant;

/// Lifetimes are clamped to this, so "never expires" TTLs such as
/// `Duration::MAX` stay representable as an `Instant`.
const MAX_TTL: Duration = Duration::from_secs(86400 * 365 * 30);

// == Cache Entry ==
/// Represents a single cache entry with value and expiry metadata.
///
/// Entries are immutable once built. A refresh replaces the whole entry.
/// Freshness is never stored; it is recomputed against the caller's `now`.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// Instant the entry was inserted
    pub inserted_at: Instant,
    /// Instant after which the entry is stale
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new entry inserted at `now` that expires after `ttl`.
    ///
    /// A zero `ttl` yields an entry that is already stale. TTLs beyond
    /// roughly thirty years are clamped.
    pub fn new(value: V, now: Instant, ttl: Duration) -> Self {
        Self {
            value,
            inserted_at: now,
            expires_at: now + ttl.min(MAX_TTL),
        }
    }

    // == Is Fresh ==
    /// Returns `true` while `now < expires_at`.
    ///
    /// Boundary condition: an entry is stale at exactly its expiry instant.
    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    // == Is Expired ==
    pub fn is_expired(&self, now: Instant) -> bool {
        !self.is_fresh(now)
    }

    // == Time To Live ==
    /// Returns the remaining lifetime, or zero once expired.
    pub fn ttl_remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }

    // == Staleness ==
    /// Returns how long the entry has been expired, or zero while fresh.
    pub fn stale_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.expires_at)
    }
}
