//! Durable Store Adapter
//!
//! Best-effort persistence of cache records under `<prefix><key>`. Nothing in
//! here returns an error to the engine: a missing backend, a full backend or a
//! corrupt record all degrade to "not persisted".

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{StorageBackend, StorageError};
use crate::cache::{current_timestamp_ms, PersistedRecord};

const PROBE_KEY: &str = "__mini_swr_probe__";

// == Durable Store ==
/// Prefix-scoped view over a shared [`StorageBackend`].
#[derive(Clone)]
pub struct DurableStore {
    backend: Option<Arc<dyn StorageBackend>>,
    prefix: String,
}

impl DurableStore {
    /// Wraps `backend`, probing it first. An unusable backend is discarded.
    pub fn new(backend: Option<Arc<dyn StorageBackend>>, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let backend = backend.filter(|b| probe_backend(b.as_ref()));
        if backend.is_none() {
            debug!(prefix = %prefix, "durable storage not available, running in memory only");
        }
        Self { backend, prefix }
    }

    /// A store that persists nothing.
    pub fn disabled(prefix: impl Into<String>) -> Self {
        Self {
            backend: None,
            prefix: prefix.into(),
        }
    }

    // == Probe ==
    /// Returns whether the backend accepts a throwaway write and delete.
    pub fn probe(&self) -> bool {
        self.backend
            .as_deref()
            .is_some_and(|backend| probe_backend(backend))
    }

    /// Whether a usable backend was found at construction.
    pub fn is_supported(&self) -> bool {
        self.backend.is_some()
    }

    fn physical_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    // == Save ==
    /// Writes a serialized record.
    ///
    /// On a quota failure, runs `evict` once and retries once. A second
    /// failure drops the write; the in-memory entry stays authoritative.
    pub fn save<F>(&self, key: &str, payload: &str, evict: F) -> bool
    where
        F: FnOnce(),
    {
        let Some(backend) = self.backend.as_deref() else {
            return false;
        };
        let physical = self.physical_key(key);

        match backend.set_item(&physical, payload) {
            Ok(()) => true,
            Err(StorageError::QuotaExceeded) => {
                debug!(key, "storage quota exceeded, evicting before retry");
                evict();
                match backend.set_item(&physical, payload) {
                    Ok(()) => true,
                    Err(err) => {
                        warn!(key, error = %err, "dropping persisted write after retry");
                        false
                    }
                }
            }
            Err(err) => {
                warn!(key, error = %err, "dropping persisted write");
                false
            }
        }
    }

    // == Load All ==
    /// Reads every record under the prefix.
    ///
    /// Expired records are deleted from the backend; unreadable ones are
    /// skipped. Returned keys have the prefix stripped.
    pub fn load_all<V: DeserializeOwned>(&self) -> Vec<(String, PersistedRecord<V>)> {
        let Some(backend) = self.backend.as_deref() else {
            return Vec::new();
        };

        let keys = match backend.keys() {
            Ok(keys) => keys,
            Err(err) => {
                warn!(error = %err, "unable to enumerate durable storage");
                return Vec::new();
            }
        };

        let now = current_timestamp_ms();
        let mut records = Vec::new();

        for physical in keys {
            let Some(key) = physical.strip_prefix(&self.prefix) else {
                continue;
            };
            if physical == PROBE_KEY {
                continue;
            }

            let raw = match backend.get_item(&physical) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(err) => {
                    warn!(key, error = %err, "unable to read persisted record");
                    continue;
                }
            };

            let record: PersistedRecord<V> = match serde_json::from_str(&raw) {
                Ok(record) => record,
                Err(err) => {
                    warn!(key, error = %err, "skipping corrupt persisted record");
                    continue;
                }
            };

            if record.is_expired_at(now) {
                debug!(key, "dropping expired persisted record");
                let _ = backend.remove_item(&physical);
                continue;
            }

            records.push((key.to_string(), record));
        }

        records
    }

    // == Remove ==
    /// Deletes one record. Failures are ignored.
    pub fn remove(&self, key: &str) {
        if let Some(backend) = self.backend.as_deref() {
            if let Err(err) = backend.remove_item(&self.physical_key(key)) {
                debug!(key, error = %err, "failed to remove persisted record");
            }
        }
    }

    // == Clear ==
    /// Deletes every record under the prefix.
    pub fn clear(&self) -> usize {
        self.clear_matching(|_| true)
    }

    /// Deletes records under the prefix whose logical key satisfies `pred`.
    pub fn clear_matching<P>(&self, pred: P) -> usize
    where
        P: Fn(&str) -> bool,
    {
        let Some(backend) = self.backend.as_deref() else {
            return 0;
        };
        let keys = match backend.keys() {
            Ok(keys) => keys,
            Err(err) => {
                debug!(error = %err, "unable to enumerate durable storage for clear");
                return 0;
            }
        };

        keys.iter()
            .filter_map(|physical| {
                let key = physical.strip_prefix(&self.prefix)?;
                pred(key).then_some(physical)
            })
            .filter(|physical| backend.remove_item(physical).is_ok())
            .count()
    }
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore")
            .field("prefix", &self.prefix)
            .field("supported", &self.is_supported())
            .finish()
    }
}

fn probe_backend(backend: &dyn StorageBackend) -> bool {
    backend.set_item(PROBE_KEY, PROBE_KEY).is_ok() && backend.remove_item(PROBE_KEY).is_ok()
}
