//! Mini SWR - An in-process stale-while-revalidate cache
//!
//! Keyed cache with TTL freshness, LRU eviction, best-effort persistence,
//! fetch deduplication and revalidation notifications, plus a small HTTP
//! surface for diagnostics.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod revalidate;
pub mod storage;
pub mod tasks;
pub mod timespec;

pub use api::AppState;
pub use cache::{CacheEngine, CacheStats, EntrySnapshot, PendingFetch};
pub use config::{CacheConfig, Config};
pub use error::{CacheError, Result};
pub use revalidate::{RevalidationRegistry, SubscriptionId};
pub use storage::{FileStorage, MemoryStorage, StorageBackend};
pub use tasks::{spawn_refresh_timer, spawn_sweeper_task};
pub use timespec::TimeSpec;
