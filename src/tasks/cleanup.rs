//! Expiry Sweeper
//!
//! Periodically drops entries that can no longer be served.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheProxy;
use crate::source::Source;

/// Spawns a sweeper that calls [`CacheProxy::purge_expired`] every `interval`.
///
/// Reads never depend on the sweeper since freshness is checked on every
/// lookup. It only bounds memory held by keys nobody asks for anymore.
///
/// The returned handle is aborted by the server on shutdown.
pub fn spawn_cleanup_task<S: Source>(cache: CacheProxy<S>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "Starting TTL cleanup task");

        loop {
            tokio::time::sleep(interval).await;

            let removed = cache.purge_expired();
            if removed > 0 {
                info!("TTL cleanup: removed {} expired entries", removed);
            } else {
                debug!("TTL cleanup: no expired entries found");
            }
        }
    })
}
