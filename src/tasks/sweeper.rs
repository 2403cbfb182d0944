//! Expired Entry Sweeper
//!
//! Background task that periodically removes expired cache entries so they
//! do not sit in memory or durable storage until the next read.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{CacheEngine, CacheValue};

/// Spawns a background task that purges expired entries every `interval_ms`.
///
/// The returned handle is aborted during graceful shutdown.
///
/// # Example
/// ```ignore
/// let engine: CacheEngine = CacheEngine::new(CacheConfig::default());
/// let sweeper = spawn_sweeper_task(engine.clone(), 1_000);
/// // Later, during shutdown:
/// sweeper.abort();
/// ```
pub fn spawn_sweeper_task<V: CacheValue>(engine: CacheEngine<V>, interval_ms: u64) -> JoinHandle<()> {
    let interval = Duration::from_millis(interval_ms.max(1));

    tokio::spawn(async move {
        info!(interval_ms, "Starting expired entry sweeper");

        loop {
            tokio::time::sleep(interval).await;

            let removed = engine.purge_expired();
            if removed > 0 {
                info!("Sweeper: removed {} expired entries", removed);
            } else {
                debug!("Sweeper: no expired entries found");
            }
        }
    })
}
