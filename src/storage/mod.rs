//! Storage Module
//!
//! Byte-oriented key/value backends and the prefix-scoped adapter the cache
//! engine persists through.
//!
//! # Backends
//! - [`MemoryStorage`]: process-local map with an optional byte quota
//! - [`FileStorage`]: one file per key under a directory

mod durable;
mod file;
mod memory;

pub use durable::DurableStore;
pub use file::FileStorage;
pub use memory::MemoryStorage;

use thiserror::Error;

// == Storage Error ==
/// Failures reported by a storage backend.
///
/// These never escape the cache engine; persistence is best effort.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The write would exceed the backend's capacity
    #[error("storage quota exceeded")]
    QuotaExceeded,

    /// The backend cannot be used in this environment
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Underlying I/O failure
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type for storage backends.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// == Storage Backend ==
/// A byte-oriented key/value store shared by every adapter prefix.
pub trait StorageBackend: Send + Sync {
    /// Reads the value stored under `key`.
    fn get_item(&self, key: &str) -> StorageResult<Option<String>>;

    /// Writes `value` under `key`, replacing any previous value.
    fn set_item(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Deletes `key`. Deleting an absent key succeeds.
    fn remove_item(&self, key: &str) -> StorageResult<()>;

    /// Lists every key in the backend, regardless of prefix.
    fn keys(&self) -> StorageResult<Vec<String>>;
}
