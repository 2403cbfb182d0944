//! Refresh Timers
//!
//! Interval tasks that ask a key's subscribers to revalidate. The engine
//! owns the handles, so `clear` and `clear_matching` stop them.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::cache::{CacheEngine, CacheValue};
use crate::error::Result;
use crate::timespec::{self, TimeSpec};

/// Starts notifying `key`'s revalidation subscribers every `interval`.
///
/// Replaces any timer already registered for the key. The first
/// notification fires one full interval after the call.
pub fn spawn_refresh_timer<V: CacheValue>(
    engine: &CacheEngine<V>,
    key: &str,
    interval: impl Into<TimeSpec>,
) -> Result<()> {
    let interval_ms = timespec::parse(interval)?.max(1);
    let registry = engine.revalidation_handle();
    let owned_key = key.to_string();

    let handle: JoinHandle<()> = tokio::spawn(async move {
        let period = Duration::from_millis(interval_ms);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let notified = registry.notify(&owned_key);
            debug!(key = %owned_key, notified, "refresh timer fired");
        }
    });

    engine.set_refresh_timer(key, handle);
    Ok(())
}
