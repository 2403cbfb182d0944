//! Cache Module
//!
//! Provides the in-process cache engine with TTL expiration, LRU eviction,
//! best-effort persistence and deduplicated fetches.

mod engine;
mod entry;
mod lru;
mod stats;


// Re-export public types
pub use engine::{CacheEngine, CacheValue, PendingFetch};
pub use entry::{current_timestamp_ms, CacheEntry, EntrySnapshot, PersistedRecord};
pub use lru::RecencyIndex;
pub use stats::CacheStats;

// == Public Constants ==
/// Maximum allowed key length in bytes, enforced at the HTTP surface
pub const MAX_KEY_LENGTH: usize = 256;
