//! Cache Entry Module
//!
//! Defines individual cache entries, their persisted wire format and the
//! read-only snapshot handed to diagnostics tooling.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The stored value, absent while only a fetch placeholder exists
    pub data: Option<V>,
    /// Last (throttled) access timestamp (Unix milliseconds)
    pub last_access: u64,
    /// Freshness duration in milliseconds
    pub ttl_ms: u64,
    /// Expiration timestamp (Unix milliseconds)
    pub expires_at: u64,
    /// Access counter since the last write
    pub hits: u64,
    /// Estimated serialized size in bytes
    pub size: usize,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new entry holding `data`, fresh for `ttl_ms`.
    pub fn new(data: V, ttl_ms: u64, size: usize) -> Self {
        let now = current_timestamp_ms();
        Self {
            data: Some(data),
            last_access: now,
            ttl_ms,
            expires_at: now.saturating_add(ttl_ms),
            hits: 0,
            size,
        }
    }

    /// Creates a data-less entry that holds a map slot while a fetch is pending.
    ///
    /// Placeholders count toward the item limit but weigh 0 bytes.
    pub fn placeholder(ttl_ms: u64) -> Self {
        let now = current_timestamp_ms();
        Self {
            data: None,
            last_access: now,
            ttl_ms,
            expires_at: now.saturating_add(ttl_ms),
            hits: 0,
            size: 0,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the current time reaches `expires_at`.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// True when the entry holds no data yet.
    pub fn is_placeholder(&self) -> bool {
        self.data.is_none()
    }

    // == Time To Live ==
    /// Returns remaining freshness in milliseconds, 0 once expired.
    pub fn ttl_remaining_ms(&self) -> u64 {
        self.expires_at.saturating_sub(current_timestamp_ms())
    }

    /// Borrows the entry as its persisted form. Placeholders have nothing to persist.
    pub fn to_record(&self) -> Option<PersistedRecord<&V>> {
        self.data.as_ref().map(|data| PersistedRecord {
            data,
            last_access: self.last_access,
            ttl: self.ttl_ms,
            expires_at: self.expires_at,
            hits: self.hits,
            size: self.size,
        })
    }

    /// Rebuilds an entry from its persisted form.
    pub fn from_record(record: PersistedRecord<V>) -> Self {
        Self {
            data: Some(record.data),
            last_access: record.last_access,
            ttl_ms: record.ttl,
            expires_at: record.expires_at,
            hits: record.hits,
            size: record.size,
        }
    }
}

impl<V: Clone> CacheEntry<V> {
    /// Copies out the entry's metadata and data without touching it.
    pub fn snapshot(&self, key: &str, pending: bool) -> EntrySnapshot<V> {
        let now = current_timestamp_ms();
        EntrySnapshot {
            key: key.to_string(),
            data: self.data.clone(),
            last_access: self.last_access,
            ttl: self.ttl_ms,
            expires_at: self.expires_at,
            hits: self.hits,
            size: self.size,
            pending,
            expired: self.is_expired_at(now),
        }
    }
}

// == Persisted Record ==
/// Durable-store wire format: `{data, lastAccess, ttl, expiresAt, hits, size}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord<V> {
    pub data: V,
    pub last_access: u64,
    pub ttl: u64,
    pub expires_at: u64,
    pub hits: u64,
    pub size: usize,
}

impl<V> PersistedRecord<V> {
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

// == Entry Snapshot ==
/// Read-only view of an entry for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrySnapshot<V> {
    pub key: String,
    pub data: Option<V>,
    pub last_access: u64,
    pub ttl: u64,
    pub expires_at: u64,
    pub hits: u64,
    pub size: usize,
    /// Whether a fetch is outstanding for this key
    pub pending: bool,
    pub expired: bool,
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
