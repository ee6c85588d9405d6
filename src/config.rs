//! Configuration Module
//!
//! Cache behaviour settings, plus loading the demo server's configuration
//! from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::AbandonPolicy;

// == Cache Config ==
/// Settings for a [`CacheProxy`](crate::cache::CacheProxy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// How long a fetched value stays fresh
    pub ttl: Duration,
    /// LRU capacity bound, `None` = unbounded
    pub max_entries: Option<usize>,
    /// Memoize failures for `negative_ttl`
    pub cache_errors: bool,
    /// How long a memoized failure is served
    pub negative_ttl: Duration,
    /// Serve a value up to this long past expiry when the source fails
    pub stale_if_error: Option<Duration>,
    /// Fate of a source call nobody is waiting for anymore
    pub abandon: AbandonPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            max_entries: Some(1000),
            cache_errors: false,
            negative_ttl: Duration::from_secs(1),
            stale_if_error: None,
            abandon: AbandonPolicy::Complete,
        }
    }
}

impl CacheConfig {
    /// Creates a config with the given TTL and defaults for everything else.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            ..Self::default()
        }
    }

    pub fn max_entries(mut self, max_entries: Option<usize>) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Enables failure memoization for `negative_ttl`.
    pub fn cache_errors(mut self, negative_ttl: Duration) -> Self {
        self.cache_errors = true;
        self.negative_ttl = negative_ttl;
        self
    }

    /// Enables serving stale values for up to `window` past expiry on source failure.
    pub fn stale_if_error(mut self, window: Duration) -> Self {
        self.stale_if_error = Some(window);
        self
    }

    pub fn abandon(mut self, abandon: AbandonPolicy) -> Self {
        self.abandon = abandon;
        self
    }
}

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// TTL in milliseconds for fetched values
    pub ttl_ms: u64,
    /// Maximum number of entries the cache can hold, 0 = unbounded
    pub max_entries: usize,
    /// Whether failures are memoized
    pub cache_errors: bool,
    /// TTL in milliseconds for memoized failures
    pub negative_ttl_ms: u64,
    /// Stale-if-error window in milliseconds, None = disabled
    pub stale_if_error_ms: Option<u64>,
    /// Fate of abandoned source calls
    pub abandon: AbandonPolicy,
    /// HTTP server port
    pub server_port: u16,
    /// Background cleanup task interval in seconds
    pub cleanup_interval: u64,
    /// Simulated latency of the product source in milliseconds
    pub source_latency_ms: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_TTL_MS` - Entry TTL in milliseconds (default: 30000)
    /// - `MAX_ENTRIES` - Maximum cache entries, 0 = unbounded (default: 1000)
    /// - `CACHE_ERRORS` - Memoize failures (default: false)
    /// - `NEGATIVE_TTL_MS` - TTL of memoized failures (default: 1000)
    /// - `STALE_IF_ERROR_MS` - Stale-if-error window, unset = disabled
    /// - `ABANDON_POLICY` - `complete` or `cancel` (default: complete)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CLEANUP_INTERVAL` - Cleanup frequency in seconds (default: 1)
    /// - `SOURCE_LATENCY_MS` - Simulated product source latency (default: 1000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ttl_ms: env_or("CACHE_TTL_MS", defaults.ttl_ms),
            max_entries: env_or("MAX_ENTRIES", defaults.max_entries),
            cache_errors: env_or("CACHE_ERRORS", defaults.cache_errors),
            negative_ttl_ms: env_or("NEGATIVE_TTL_MS", defaults.negative_ttl_ms),
            stale_if_error_ms: env_parse("STALE_IF_ERROR_MS"),
            abandon: env::var("ABANDON_POLICY")
                .ok()
                .and_then(|v| parse_abandon_policy(&v))
                .unwrap_or(defaults.abandon),
            server_port: env_or("SERVER_PORT", defaults.server_port),
            cleanup_interval: env_or("CLEANUP_INTERVAL", defaults.cleanup_interval),
            source_latency_ms: env_or("SOURCE_LATENCY_MS", defaults.source_latency_ms),
        }
    }

    /// Derives the cache settings.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            ttl: Duration::from_millis(self.ttl_ms),
            max_entries: (self.max_entries > 0).then_some(self.max_entries),
            cache_errors: self.cache_errors,
            negative_ttl: Duration::from_millis(self.negative_ttl_ms),
            stale_if_error: self.stale_if_error_ms.map(Duration::from_millis),
            abandon: self.abandon,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ttl_ms: 30_000,
            max_entries: 1000,
            cache_errors: false,
            negative_ttl_ms: 1000,
            stale_if_error_ms: None,
            abandon: AbandonPolicy::Complete,
            server_port: 3000,
            cleanup_interval: 1,
            source_latency_ms: 1000,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env_parse(name).unwrap_or(default)
}

fn parse_abandon_policy(value: &str) -> Option<AbandonPolicy> {
    match value.trim().to_ascii_lowercase().as_str() {
        "complete" => Some(AbandonPolicy::Complete),
        "cancel" => Some(AbandonPolicy::Cancel),
        _ => None,
    }
}
