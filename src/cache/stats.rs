//! Cache Statistics Module
//!
//! Aggregate view of the cache: entry count, sizes, hits, and whether
//! durable persistence is active.

use serde::Serialize;

// == Cache Stats ==
/// Snapshot of cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Entries currently in the map, placeholders included
    pub items: usize,
    /// Sum of estimated entry sizes in bytes
    pub total_size: usize,
    /// Sum of per-entry hit counters
    pub total_hits: u64,
    /// `total_size / items`, 0 when empty
    pub average_size: usize,
    /// A usable durable backend was found
    pub storage_supported: bool,
    /// Writes are actually being persisted
    pub persistence_enabled: bool,
    /// Reads that found nothing fresh
    pub misses: u64,
    /// Entries dropped by LRU eviction
    pub evictions: u64,
}

impl CacheStats {
    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if nothing was read.
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.total_hits as f64 / total as f64
        }
    }
}

// == Counters ==
/// Running counters the engine keeps between snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Counters {
    pub misses: u64,
    pub evictions: u64,
}

impl Counters {
    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }
}
