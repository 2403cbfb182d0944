//! In-memory storage backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use super::{StorageBackend, StorageError, StorageResult};

// == Memory Storage ==
/// Process-local backend that behaves like a browser session store.
///
/// Sizes are counted as key bytes plus value bytes. With a quota set, a write
/// that would push the total past it fails with [`StorageError::QuotaExceeded`].
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<String, String>>,
    quota: Option<usize>,
    unavailable: AtomicBool,
}

impl MemoryStorage {
    /// Creates an unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding at most `quota` bytes.
    pub fn with_quota(quota: usize) -> Self {
        Self {
            quota: Some(quota),
            ..Self::default()
        }
    }

    /// Makes every operation fail, as if storage were disabled.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Total bytes currently held.
    pub fn used_bytes(&self) -> usize {
        self.items
            .read()
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("memory storage disabled".to_string()))
        } else {
            Ok(())
        }
    }
}

impl StorageBackend for MemoryStorage {
    fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        self.check_available()?;
        Ok(self.items.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        self.check_available()?;
        let mut items = self.items.write();

        if let Some(quota) = self.quota {
            let current: usize = items
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if current + key.len() + value.len() > quota {
                return Err(StorageError::QuotaExceeded);
            }
        }

        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> StorageResult<()> {
        self.check_available()?;
        self.items.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        self.check_available()?;
        Ok(self.items.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let storage = MemoryStorage::new();

        storage.set_item("a", "1").unwrap();
        assert_eq!(storage.get_item("a").unwrap().as_deref(), Some("1"));

        storage.remove_item("a").unwrap();
        assert_eq!(storage.get_item("a").unwrap(), None);
        storage.remove_item("a").unwrap();
    }

    #[test]
    fn test_quota_rejects_oversized_write() {
        let storage = MemoryStorage::with_quota(10);

        storage.set_item("k", "12345").unwrap();
        let err = storage.set_item("j", "12345").unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded));
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_quota_counts_replacement_once() {
        let storage = MemoryStorage::with_quota(10);

        storage.set_item("k", "12345678").unwrap();
        storage.set_item("k", "87654321").unwrap();
        assert_eq!(storage.used_bytes(), 9);
    }

    #[test]
    fn test_unavailable() {
        let storage = MemoryStorage::new();
        storage.set_unavailable(true);

        assert!(matches!(
            storage.set_item("a", "1"),
            Err(StorageError::Unavailable(_))
        ));
        assert!(storage.keys().is_err());
    }
}
