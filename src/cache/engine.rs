//! Cache Engine Module
//!
//! Main cache engine combining HashMap storage with recency tracking, TTL
//! expiration, best-effort persistence and deduplicated fetches.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::stats::Counters;
use crate::cache::{current_timestamp_ms, CacheEntry, CacheStats, EntrySnapshot, RecencyIndex};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::revalidate::RevalidationRegistry;
use crate::storage::{DurableStore, StorageBackend};
use crate::timespec::{self, TimeSpec};

/// Handle to an in-flight fetch, clonable so every waiter sees one outcome.
pub type PendingFetch<V> = Shared<BoxFuture<'static, Result<V>>>;

/// Values the engine can hold: cloned out on read, serialized for sizing
/// and persistence.
pub trait CacheValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

static GLOBAL: Lazy<CacheEngine<Value>> = Lazy::new(|| CacheEngine::new(CacheConfig::default()));

// == Cache Engine ==
/// Cheaply clonable handle to one cache instance.
///
/// All bookkeeping happens inside a single lock that is never held across an
/// `.await`, so every operation is one atomic step.
pub struct CacheEngine<V = Value> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for CacheEngine<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<V> {
    config: CacheConfig,
    durable: DurableStore,
    storage_supported: bool,
    state: Mutex<State<V>>,
    revalidation: Arc<RevalidationRegistry>,
    next_fetch_id: AtomicU64,
}

struct State<V> {
    entries: HashMap<String, CacheEntry<V>>,
    lru: RecencyIndex,
    pending: HashMap<String, PendingSlot<V>>,
    timers: HashMap<String, JoinHandle<()>>,
    counters: Counters,
}

struct PendingSlot<V> {
    id: u64,
    fetch: PendingFetch<V>,
}

impl CacheEngine<Value> {
    /// Process-wide default instance: in-memory, default configuration.
    pub fn global() -> &'static CacheEngine<Value> {
        &GLOBAL
    }
}

impl<V: CacheValue> CacheEngine<V> {
    // == Constructors ==
    /// Creates an in-memory engine with no durable store.
    pub fn new(config: CacheConfig) -> Self {
        let durable = DurableStore::disabled(config.prefix.clone());
        Self::build(config, durable, false)
    }

    /// Creates an engine persisting through `backend`.
    ///
    /// The backend is probed first; when it is unusable, or persistence is
    /// turned off in `config`, the engine runs purely in memory. Surviving
    /// records under the configured prefix are loaded back.
    pub fn with_storage(config: CacheConfig, backend: Arc<dyn StorageBackend>) -> Self {
        let probed = DurableStore::new(Some(backend), config.prefix.clone());
        let supported = probed.is_supported();
        let durable = if config.persist {
            probed
        } else {
            DurableStore::disabled(config.prefix.clone())
        };

        let engine = Self::build(config, durable, supported);
        engine.reload();
        engine
    }

    fn build(mut config: CacheConfig, durable: DurableStore, storage_supported: bool) -> Self {
        config.max_size = config.max_size.max(1);
        Self {
            inner: Arc::new(Inner {
                config,
                durable,
                storage_supported,
                state: Mutex::new(State {
                    entries: HashMap::new(),
                    lru: RecencyIndex::new(),
                    pending: HashMap::new(),
                    timers: HashMap::new(),
                    counters: Counters::default(),
                }),
                revalidation: Arc::new(RevalidationRegistry::new()),
                next_fetch_id: AtomicU64::new(0),
            }),
        }
    }

    // Oldest records go in first so the most recent ends up at the front.
    fn reload(&self) {
        let inner = &*self.inner;
        if !inner.durable.is_supported() {
            return;
        }

        let mut records = inner.durable.load_all::<V>();
        records.sort_by_key(|(_, record)| record.last_access);

        let overflow = records.len().saturating_sub(inner.config.max_size);
        for (key, _) in records.drain(..overflow) {
            inner.durable.remove(&key);
        }

        let mut guard = inner.state.lock();
        let state = &mut *guard;
        for (key, record) in records {
            state.lru.insert_front(&key);
            state.entries.insert(key, CacheEntry::from_record(record));
        }
        debug!(
            entries = state.entries.len(),
            dropped = overflow,
            "restored entries from durable storage"
        );
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    // == Get ==
    /// Returns the value for `key` if it is present and fresh.
    ///
    /// Expired entries are removed on discovery. The hit counter and
    /// last-access time only move once per throttle window; recency is
    /// refreshed on every successful read. A placeholder yields `None`.
    pub fn get(&self, key: &str) -> Option<V> {
        let inner = &*self.inner;
        let mut guard = inner.state.lock();
        let state = &mut *guard;
        let now = current_timestamp_ms();

        let Some(entry) = state.entries.get_mut(key) else {
            state.counters.record_miss();
            return None;
        };

        if entry.is_expired_at(now) {
            inner.remove_entry(state, key);
            state.counters.record_miss();
            debug!(key, "entry expired on access");
            return None;
        }

        let throttle = inner.config.access_throttle_ms();
        let counted = entry.data.is_some()
            && (throttle == 0 || now.saturating_sub(entry.last_access) > throttle);
        if counted {
            entry.hits += 1;
            entry.last_access = now;
        }
        let data = entry.data.clone();

        state.lru.touch(key);
        if counted {
            inner.persist(state, key);
        }
        if data.is_none() {
            state.counters.record_miss();
        }
        data
    }

    // == Set ==
    /// Stores `data` under `key` for `ttl`.
    ///
    /// Returns `Ok(false)` without touching the cache when the estimated
    /// size exceeds the per-item limit. A new key evicts the least recently
    /// used entry first when the cache is full.
    pub fn set(&self, key: &str, data: V, ttl: impl Into<TimeSpec>) -> Result<bool> {
        match self.store(key, data, ttl) {
            Ok(()) => Ok(true),
            Err(CacheError::ItemTooLarge { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Like [`set`](Self::set), but reports an oversized item as an error.
    pub fn try_set(&self, key: &str, data: V, ttl: impl Into<TimeSpec>) -> Result<()> {
        self.store(key, data, ttl)
    }

    // Sizes the value exactly once.
    fn store(&self, key: &str, data: V, ttl: impl Into<TimeSpec>) -> Result<()> {
        let ttl_ms = timespec::parse(ttl)?;
        let inner = &*self.inner;
        let max = inner.config.max_item_size;

        let size = estimate_size(&data, max);
        if size > max {
            debug!(key, size, max, "rejecting oversized item");
            return Err(CacheError::ItemTooLarge { size, max });
        }

        let mut guard = inner.state.lock();
        inner.insert(&mut guard, key, data, ttl_ms, size);
        Ok(())
    }

    // == Pending Fetches ==
    /// Registers an in-flight fetch for `key`.
    ///
    /// An existing entry keeps its data and expiry; otherwise a data-less
    /// placeholder is created with `ttl`. Any earlier handle is replaced.
    pub fn set_pending_fetch(
        &self,
        key: &str,
        handle: PendingFetch<V>,
        ttl: impl Into<TimeSpec>,
    ) -> Result<()> {
        let ttl_ms = timespec::parse(ttl)?;
        let inner = &*self.inner;
        let id = inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);

        let mut guard = inner.state.lock();
        inner.register_pending(&mut guard, key, id, handle, ttl_ms);
        Ok(())
    }

    pub fn get_pending_fetch(&self, key: &str) -> Option<PendingFetch<V>> {
        self.inner
            .state
            .lock()
            .pending
            .get(key)
            .map(|slot| slot.fetch.clone())
    }

    /// Detaches the pending handle for `key`, leaving any data in place.
    pub fn clear_pending_fetch(&self, key: &str) -> bool {
        self.inner.state.lock().pending.remove(key).is_some()
    }

    // == Preload ==
    /// Returns the value produced by `fetch`, sharing one in-flight fetch
    /// per key across all concurrent callers.
    ///
    /// The fetch runs on its own task, so it completes and populates the
    /// cache even when every caller stops waiting. On failure a placeholder
    /// entry is removed while previously cached data is left in place.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime, since the fetch is
    /// started with `tokio::spawn`.
    pub async fn preload<F, Fut, E>(&self, key: &str, fetch: F, ttl: impl Into<TimeSpec>) -> Result<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        let ttl_ms = timespec::parse(ttl)?;
        let inner = &*self.inner;

        let pending = {
            let mut guard = inner.state.lock();
            let state = &mut *guard;

            match state.pending.get(key) {
                Some(slot) => {
                    debug!(key, "joining in-flight fetch");
                    slot.fetch.clone()
                }
                None => {
                    let id = inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = oneshot::channel::<Result<V>>();
                    let shared: PendingFetch<V> = rx
                        .map(|received| received.unwrap_or(Err(CacheError::FetchCancelled)))
                        .boxed()
                        .shared();
                    inner.register_pending(state, key, id, shared.clone(), ttl_ms);

                    let engine = self.clone();
                    let key = key.to_string();
                    tokio::spawn(async move {
                        let result = match AssertUnwindSafe(async move { fetch().await })
                            .catch_unwind()
                            .await
                        {
                            Ok(Ok(value)) => Ok(value),
                            Ok(Err(err)) => Err(CacheError::fetch_failed(err)),
                            Err(_) => Err(CacheError::fetch_failed(anyhow::anyhow!(
                                "fetch for {key} panicked"
                            ))),
                        };
                        engine.settle(&key, id, &result, ttl_ms);
                        let _ = tx.send(result);
                    });

                    shared
                }
            }
        };

        pending.await
    }

    // The pending handle is detached before any waiter sees the outcome.
    fn settle(&self, key: &str, id: u64, result: &Result<V>, ttl_ms: u64) {
        let inner = &*self.inner;
        let mut guard = inner.state.lock();
        let state = &mut *guard;

        if state.pending.get(key).map(|slot| slot.id) != Some(id) {
            debug!(key, "fetch settled after being superseded or cleared");
            return;
        }
        state.pending.remove(key);

        match result {
            Ok(data) => {
                let size = estimate_size(data, inner.config.max_item_size);
                if size > inner.config.max_item_size {
                    warn!(key, size, "fetched value too large to cache");
                    inner.drop_placeholder(state, key);
                } else {
                    inner.insert(state, key, data.clone(), ttl_ms, size);
                }
            }
            Err(err) => {
                debug!(key, error = %err, "fetch failed");
                inner.drop_placeholder(state, key);
            }
        }
    }

    // == Remove ==
    /// Deletes `key` everywhere: map, recency, pending fetch, refresh timer
    /// and durable store.
    ///
    /// Returns whether an entry existed. Removing an absent key is a no-op.
    pub fn remove(&self, key: &str) -> bool {
        let inner = &*self.inner;
        let mut guard = inner.state.lock();
        let state = &mut *guard;

        state.pending.remove(key);
        if let Some(timer) = state.timers.remove(key) {
            timer.abort();
        }
        inner.remove_entry(state, key)
    }

    // == Clear ==
    /// Removes everything: entries, pending fetches, timers, durable records
    /// under the prefix and revalidation subscriptions.
    pub fn clear(&self) -> usize {
        let inner = &*self.inner;
        let removed = {
            let mut guard = inner.state.lock();
            let state = &mut *guard;

            let removed = state.entries.len();
            state.entries.clear();
            state.lru.clear();
            state.pending.clear();
            for (_, timer) in state.timers.drain() {
                timer.abort();
            }
            removed
        };

        inner.durable.clear();
        inner.revalidation.clear();
        debug!(removed, "cache cleared");
        removed
    }

    /// Removes keys fully matching the regular expression `pattern`.
    ///
    /// Only matching keys lose their durable records, timers and
    /// subscriptions.
    pub fn clear_matching(&self, pattern: &str) -> Result<usize> {
        let re = Regex::new(&format!("^(?:{})$", pattern))
            .map_err(|err| CacheError::InvalidPattern(err.to_string()))?;
        let inner = &*self.inner;

        let removed = {
            let mut guard = inner.state.lock();
            let state = &mut *guard;

            let keys: Vec<String> = state
                .entries
                .keys()
                .filter(|key| re.is_match(key))
                .cloned()
                .collect();
            for key in &keys {
                state.entries.remove(key);
                state.lru.remove(key);
            }

            state.pending.retain(|key, _| !re.is_match(key));
            state.timers.retain(|key, timer| {
                let matched = re.is_match(key);
                if matched {
                    timer.abort();
                }
                !matched
            });
            keys.len()
        };

        inner.durable.clear_matching(|key| re.is_match(key));
        inner.revalidation.clear_matching(|key| re.is_match(key));
        debug!(pattern, removed, "cleared matching keys");
        Ok(removed)
    }

    // == Purge Expired ==
    /// Removes every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let inner = &*self.inner;
        let mut guard = inner.state.lock();
        let state = &mut *guard;
        let now = current_timestamp_ms();

        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            inner.remove_entry(state, key);
        }
        expired.len()
    }

    // == Refresh Timers ==
    /// Stores the refresh timer for `key`, aborting any previous one.
    pub fn set_refresh_timer(&self, key: &str, timer: JoinHandle<()>) {
        let previous = self.inner.state.lock().timers.insert(key.to_string(), timer);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Aborts and forgets the refresh timer for `key`.
    pub fn clear_refresh_timer(&self, key: &str) -> bool {
        match self.inner.state.lock().timers.remove(key) {
            Some(timer) => {
                timer.abort();
                true
            }
            None => false,
        }
    }

    pub fn has_refresh_timer(&self, key: &str) -> bool {
        self.inner.state.lock().timers.contains_key(key)
    }

    // == Revalidation ==
    /// Per-key revalidation subscriptions owned by this engine.
    pub fn revalidation(&self) -> &RevalidationRegistry {
        &self.inner.revalidation
    }

    /// Shared handle to the registry, for tasks that outlive a borrow.
    pub fn revalidation_handle(&self) -> Arc<RevalidationRegistry> {
        Arc::clone(&self.inner.revalidation)
    }

    // == Introspection ==
    /// Read-only view of an entry. Does not touch recency, hits or expiry.
    pub fn inspect(&self, key: &str) -> Option<EntrySnapshot<V>> {
        let state = self.inner.state.lock();
        let pending = state.pending.contains_key(key);
        state.entries.get(key).map(|entry| entry.snapshot(key, pending))
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<String> {
        self.inner.state.lock().lru.keys()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.state.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().entries.is_empty()
    }

    // == Stats ==
    pub fn stats(&self) -> CacheStats {
        let inner = &*self.inner;
        let state = inner.state.lock();

        let items = state.entries.len();
        let total_size: usize = state.entries.values().map(|e| e.size).sum();
        let total_hits: u64 = state.entries.values().map(|e| e.hits).sum();

        CacheStats {
            items,
            total_size,
            total_hits,
            average_size: if items == 0 { 0 } else { total_size / items },
            storage_supported: inner.storage_supported,
            persistence_enabled: inner.durable.is_supported(),
            misses: state.counters.misses,
            evictions: state.counters.evictions,
        }
    }
}

impl<V: CacheValue> Inner<V> {
    fn insert(&self, state: &mut State<V>, key: &str, data: V, ttl_ms: u64, size: usize) {
        if !state.entries.contains_key(key) {
            self.make_room(state);
        }

        state
            .entries
            .insert(key.to_string(), CacheEntry::new(data, ttl_ms, size));
        state.lru.touch(key);
        self.persist(state, key);
    }

    fn register_pending(
        &self,
        state: &mut State<V>,
        key: &str,
        id: u64,
        fetch: PendingFetch<V>,
        ttl_ms: u64,
    ) {
        let now = current_timestamp_ms();
        if state
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_expired_at(now))
        {
            self.remove_entry(state, key);
        }

        if !state.entries.contains_key(key) {
            self.make_room(state);
            state
                .entries
                .insert(key.to_string(), CacheEntry::placeholder(ttl_ms));
            state.lru.insert_front(key);
        }

        state.pending.insert(key.to_string(), PendingSlot { id, fetch });
    }

    // Keeps the map below `max_size` before a new key goes in.
    fn make_room(&self, state: &mut State<V>) {
        while state.entries.len() >= self.config.max_size {
            if self.evict_one(state, None).is_none() {
                break;
            }
        }
    }

    fn evict_one(&self, state: &mut State<V>, protect: Option<&str>) -> Option<String> {
        if protect.is_some() && state.lru.peek_back() == protect {
            return None;
        }
        let victim = state.lru.evict_back()?;
        state.entries.remove(&victim);
        self.durable.remove(&victim);
        state.counters.record_eviction();
        debug!(key = %victim, "evicted least recently used entry");
        Some(victim)
    }

    fn remove_entry(&self, state: &mut State<V>, key: &str) -> bool {
        let existed = state.entries.remove(key).is_some();
        state.lru.remove(key);
        self.durable.remove(key);
        existed
    }

    fn drop_placeholder(&self, state: &mut State<V>, key: &str) {
        if state.entries.get(key).is_some_and(CacheEntry::is_placeholder) {
            self.remove_entry(state, key);
        }
    }

    // A full backend gets one eviction pass, never of the key being saved.
    fn persist(&self, state: &mut State<V>, key: &str) {
        if !self.durable.is_supported() {
            return;
        }
        let payload = match state.entries.get(key).and_then(CacheEntry::to_record) {
            Some(record) => match serde_json::to_string(&record) {
                Ok(payload) => payload,
                Err(err) => {
                    debug!(key, error = %err, "value not serializable, skipping persistence");
                    return;
                }
            },
            None => return,
        };

        self.durable.save(key, &payload, || {
            self.evict_one(state, Some(key));
        });
    }
}

// Unserializable values are treated as maximally large instead of failing.
fn estimate_size<V: Serialize>(data: &V, max_item_size: usize) -> usize {
    serde_json::to_vec(data)
        .map(|bytes| bytes.len())
        .unwrap_or(max_item_size)
}

impl<V> std::fmt::Debug for CacheEngine<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("config", &self.inner.config)
            .field("durable", &self.inner.durable)
            .finish()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;
    use std::thread::sleep;
    use std::time::Duration;

    fn config(max_size: usize) -> CacheConfig {
        CacheConfig {
            max_size,
            ..CacheConfig::default()
        }
    }

    fn engine(max_size: usize) -> CacheEngine<String> {
        CacheEngine::new(config(max_size))
    }

    #[test]
    fn test_set_and_get() {
        let cache = engine(100);

        assert!(cache.set("key1", "value1".to_string(), "1h").unwrap());
        assert_eq!(cache.get("key1").as_deref(), Some("value1"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_get_missing() {
        let cache = engine(100);
        assert_eq!(cache.get("nonexistent"), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_overwrite() {
        let cache = engine(100);

        cache.set("key1", "value1".to_string(), "1h").unwrap();
        cache.set("key1", "value2".to_string(), "1h").unwrap();

        assert_eq!(cache.get("key1").as_deref(), Some("value2"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalid_ttl_is_an_error() {
        let cache = engine(100);

        let err = cache.set("key1", "v".to_string(), "bogus").unwrap_err();
        assert!(matches!(err, CacheError::InvalidDuration(_)));
        let err = cache.set("key1", "v".to_string(), "5x").unwrap_err();
        assert!(matches!(err, CacheError::InvalidDuration(_)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_ttl_expiration_removes_entry() {
        let cache = engine(100);

        cache.set("key1", "value1".to_string(), "50ms").unwrap();
        assert!(cache.get("key1").is_some());

        sleep(Duration::from_millis(80));

        assert_eq!(cache.get("key1"), None);
        assert!(!cache.contains_key("key1"));
        assert!(cache.keys().is_empty());
    }

    #[test]
    fn test_zero_ttl_is_immediately_stale() {
        let cache = engine(100);

        cache.set("key1", "value1".to_string(), 0u64).unwrap();
        assert_eq!(cache.get("key1"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction() {
        let cache = engine(3);

        cache.set("A", "a".to_string(), "1h").unwrap();
        cache.set("B", "b".to_string(), "1h").unwrap();
        cache.set("C", "c".to_string(), "1h").unwrap();
        cache.get("A");
        cache.set("D", "d".to_string(), "1h").unwrap();

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("B"), None);
        assert!(cache.get("A").is_some());
        assert!(cache.get("C").is_some());
        assert!(cache.get("D").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_lru_eviction_without_touch_drops_first_inserted() {
        let cache = engine(3);

        for key in ["k1", "k2", "k3", "k4"] {
            cache.set(key, key.to_string(), "1h").unwrap();
        }

        assert_eq!(cache.keys(), vec!["k4", "k3", "k2"]);
    }

    #[test]
    fn test_oversized_item_rejected() {
        let cache: CacheEngine<String> = CacheEngine::new(CacheConfig {
            max_item_size: 16,
            ..CacheConfig::default()
        });

        assert!(!cache.set("big", "x".repeat(64), "1h").unwrap());
        assert_eq!(cache.get("big"), None);
        assert!(cache.is_empty());

        let err = cache.try_set("big", "x".repeat(64), "1h").unwrap_err();
        assert!(matches!(err, CacheError::ItemTooLarge { max: 16, .. }));
    }

    #[test]
    fn test_oversized_overwrite_keeps_previous_value() {
        let cache: CacheEngine<String> = CacheEngine::new(CacheConfig {
            max_item_size: 16,
            ..CacheConfig::default()
        });

        cache.set("k", "small".to_string(), "1h").unwrap();
        assert!(!cache.set("k", "x".repeat(64), "1h").unwrap());
        assert_eq!(cache.get("k").as_deref(), Some("small"));
    }

    #[test]
    fn test_unserializable_value_sized_at_limit() {
        // JSON object keys must be strings, so this map cannot be serialized.
        let cache: CacheEngine<BTreeMap<Vec<u8>, u8>> = CacheEngine::new(CacheConfig {
            max_item_size: 64,
            ..CacheConfig::default()
        });
        let mut value = BTreeMap::new();
        value.insert(vec![1, 2], 3);

        assert!(cache.set("odd", value.clone(), "1h").unwrap());
        assert_eq!(cache.get("odd"), Some(value));
        assert_eq!(cache.stats().total_size, 64);
    }

    static SERIALIZE_CALLS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug, Clone, PartialEq, serde::Deserialize)]
    struct Counted(u8);

    impl Serialize for Counted {
        fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
            SERIALIZE_CALLS.fetch_add(1, Ordering::SeqCst);
            serializer.serialize_u8(self.0)
        }
    }

    #[test]
    fn test_try_set_sizes_value_once() {
        let cache: CacheEngine<Counted> = CacheEngine::new(config(10));

        cache.try_set("k", Counted(7), "1h").unwrap();

        assert_eq!(SERIALIZE_CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get("k"), Some(Counted(7)));
        assert_eq!(cache.inspect("k").unwrap().size, 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let cache = engine(100);

        cache.set("key1", "value1".to_string(), "1h").unwrap();
        assert!(cache.remove("key1"));
        assert!(!cache.remove("key1"));
        assert!(!cache.remove("never-set"));
        assert_eq!(cache.get("key1"), None);
    }

    #[test]
    fn test_clear_matching_is_full_match() {
        let cache = engine(100);

        cache.set("user:1", "a".to_string(), "1h").unwrap();
        cache.set("user:2", "b".to_string(), "1h").unwrap();
        cache.set("post:1", "c".to_string(), "1h").unwrap();
        cache.set("admin:user:3", "d".to_string(), "1h").unwrap();

        assert_eq!(cache.clear_matching("user:.*").unwrap(), 2);
        assert!(cache.get("post:1").is_some());
        assert!(cache.get("admin:user:3").is_some());
        assert_eq!(cache.get("user:1"), None);
    }

    #[test]
    fn test_clear_matching_invalid_pattern() {
        let cache = engine(100);
        assert!(matches!(
            cache.clear_matching("user:(").unwrap_err(),
            CacheError::InvalidPattern(_)
        ));
    }

    #[test]
    fn test_clear_removes_everything() {
        let cache = engine(100);

        cache.set("a", "1".to_string(), "1h").unwrap();
        cache.set("b", "2".to_string(), "1h").unwrap();
        cache.revalidation().subscribe("a", || {});

        assert_eq!(cache.clear(), 2);
        assert!(cache.is_empty());
        assert!(cache.keys().is_empty());
        assert!(cache.revalidation().watched_keys().is_empty());
    }

    #[test]
    fn test_hits_are_throttled() {
        let cache = engine(100);

        cache.set("k", "v".to_string(), "1h").unwrap();
        cache.get("k");
        cache.get("k");

        assert_eq!(cache.inspect("k").unwrap().hits, 0);
    }

    #[test]
    fn test_debug_mode_counts_every_hit() {
        let cache: CacheEngine<String> = CacheEngine::new(CacheConfig {
            debug: true,
            ..CacheConfig::default()
        });

        cache.set("k", "v".to_string(), "1h").unwrap();
        cache.get("k");
        cache.get("k");
        cache.get("k");

        assert_eq!(cache.inspect("k").unwrap().hits, 3);
        assert_eq!(cache.stats().total_hits, 3);

        cache.set("k", "w".to_string(), "1h").unwrap();
        assert_eq!(cache.inspect("k").unwrap().hits, 0);
    }

    #[test]
    fn test_get_never_moves_expiry() {
        let cache: CacheEngine<String> = CacheEngine::new(CacheConfig {
            debug: true,
            ..CacheConfig::default()
        });

        cache.set("k", "v".to_string(), "1h").unwrap();
        let before = cache.inspect("k").unwrap().expires_at;
        sleep(Duration::from_millis(5));
        cache.get("k");

        assert_eq!(cache.inspect("k").unwrap().expires_at, before);
    }

    #[test]
    fn test_inspect_has_no_side_effects() {
        let cache = engine(2);

        cache.set("a", "1".to_string(), "1h").unwrap();
        cache.set("b", "2".to_string(), "1h").unwrap();

        let snapshot = cache.inspect("a").unwrap();
        assert_eq!(snapshot.data.as_deref(), Some("1"));
        assert_eq!(snapshot.size, 3);
        assert!(!snapshot.pending);

        // "a" must still be the eviction candidate
        cache.set("c", "3".to_string(), "1h").unwrap();
        assert!(cache.inspect("a").is_none());
        assert_eq!(cache.stats().misses, 0);
    }

    #[test]
    fn test_stats() {
        let cache = engine(100);

        cache.set("a", "1".to_string(), "1h").unwrap();
        cache.set("b", "123".to_string(), "1h").unwrap();

        let stats = cache.stats();
        assert_eq!(stats.items, 2);
        assert_eq!(stats.total_size, 3 + 5);
        assert_eq!(stats.average_size, 4);
        assert!(!stats.storage_supported);
        assert!(!stats.persistence_enabled);
    }

    #[test]
    fn test_purge_expired() {
        let cache = engine(100);

        cache.set("short", "1".to_string(), "30ms").unwrap();
        cache.set("long", "2".to_string(), "1h").unwrap();
        sleep(Duration::from_millis(60));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.keys(), vec!["long"]);
    }

    #[test]
    fn test_pending_placeholder_counts_toward_limit() {
        let cache = engine(2);
        let handle: PendingFetch<String> =
            async { Ok::<_, CacheError>("x".to_string()) }.boxed().shared();

        cache.set("a", "1".to_string(), "1h").unwrap();
        cache.set("b", "2".to_string(), "1h").unwrap();
        cache.set_pending_fetch("c", handle, "1h").unwrap();

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains_key("a"));
        assert_eq!(cache.get("c"), None);
        assert!(cache.get_pending_fetch("c").is_some());
        assert_eq!(cache.stats().total_size, 3);
    }

    #[test]
    fn test_pending_on_existing_entry_keeps_data() {
        let cache = engine(10);
        let handle: PendingFetch<String> =
            async { Ok::<_, CacheError>("new".to_string()) }.boxed().shared();

        cache.set("k", "old".to_string(), "1h").unwrap();
        let expires_at = cache.inspect("k").unwrap().expires_at;
        cache.set_pending_fetch("k", handle, "1s").unwrap();

        let snapshot = cache.inspect("k").unwrap();
        assert_eq!(snapshot.data.as_deref(), Some("old"));
        assert_eq!(snapshot.expires_at, expires_at);
        assert!(snapshot.pending);

        assert!(cache.clear_pending_fetch("k"));
        assert!(cache.get_pending_fetch("k").is_none());
        assert_eq!(cache.get("k").as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn test_preload_dedups_concurrent_calls() {
        let cache = engine(10);
        let calls = Arc::new(AtomicUsize::new(0));

        let loads = (0..8).map(|_| {
            let calls = calls.clone();
            let cache = cache.clone();
            async move {
                cache
                    .preload(
                        "user:1",
                        move || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok::<_, anyhow::Error>("ada".to_string())
                        },
                        "1h",
                    )
                    .await
            }
        });
        let results = futures::future::join_all(loads).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap(), "ada");
        }
        assert_eq!(cache.get("user:1").as_deref(), Some("ada"));
        assert!(cache.get_pending_fetch("user:1").is_none());
    }

    #[tokio::test]
    async fn test_preload_failure_cleans_placeholder() {
        let cache = engine(10);

        let err = cache
            .preload(
                "k",
                || async { Err::<String, _>(anyhow::anyhow!("backend down")) },
                "1h",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::FetchFailed(_)));
        assert!(!cache.contains_key("k"));
        assert!(cache.get_pending_fetch("k").is_none());
    }

    #[tokio::test]
    async fn test_preload_failure_keeps_stale_data() {
        let cache = engine(10);
        cache.set("k", "stale".to_string(), "1h").unwrap();

        let result = cache
            .preload(
                "k",
                || async { Err::<String, _>(anyhow::anyhow!("backend down")) },
                "1h",
            )
            .await;

        assert!(result.is_err());
        assert_eq!(cache.get("k").as_deref(), Some("stale"));
    }

    #[tokio::test]
    async fn test_preload_panic_is_reported() {
        let cache = engine(10);

        let result = cache
            .preload(
                "k",
                || async {
                    if true {
                        panic!("fetch exploded");
                    }
                    Ok::<String, anyhow::Error>("never".to_string())
                },
                "1h",
            )
            .await;

        assert!(matches!(result, Err(CacheError::FetchFailed(_))));
        assert!(cache.get_pending_fetch("k").is_none());
    }

    #[tokio::test]
    async fn test_preload_completes_without_waiters() {
        let cache = engine(10);

        let load = cache.preload(
            "k",
            || async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, anyhow::Error>("done".to_string())
            },
            "1h",
        );
        // Start the fetch, then stop waiting.
        let _ = tokio::time::timeout(Duration::from_millis(1), load).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.get("k").as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_preload_invalid_ttl_fails_before_fetching() {
        let cache = engine(10);
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();

        let err = cache
            .preload(
                "k",
                move || async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>("v".to_string())
                },
                "soon",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::InvalidDuration(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refresh_timer_replaced_and_cleared() {
        let cache = engine(10);

        // The sender is dropped only when the task is torn down.
        let (tx, rx) = oneshot::channel::<()>();
        let first = tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        });
        cache.set_refresh_timer("k", first);
        cache.set_refresh_timer("k", tokio::spawn(std::future::pending::<()>()));

        assert!(rx.await.is_err());
        assert!(cache.has_refresh_timer("k"));

        assert!(cache.clear_refresh_timer("k"));
        assert!(!cache.has_refresh_timer("k"));
    }

    #[tokio::test]
    async fn test_remove_stops_refresh_timer() {
        let cache = engine(10);
        cache.set("k", "v".to_string(), "1h").unwrap();
        cache.set_refresh_timer("k", tokio::spawn(std::future::pending::<()>()));

        assert!(cache.remove("k"));
        assert!(!cache.has_refresh_timer("k"));
    }

    #[test]
    fn test_persistence_roundtrip() {
        let backend = Arc::new(MemoryStorage::new());

        let cache: CacheEngine<String> = CacheEngine::with_storage(config(10), backend.clone());
        cache.set("a", "1".to_string(), "1h").unwrap();
        sleep(Duration::from_millis(2));
        cache.set("b", "2".to_string(), "1h").unwrap();
        assert!(cache.stats().persistence_enabled);
        assert!(backend.get_item("swr:a").unwrap().is_some());

        let reloaded: CacheEngine<String> = CacheEngine::with_storage(config(10), backend);
        assert_eq!(reloaded.keys(), vec!["b", "a"]);
        assert_eq!(reloaded.get("a").as_deref(), Some("1"));
    }

    #[test]
    fn test_reload_keeps_most_recent_within_limit() {
        let backend = Arc::new(MemoryStorage::new());

        let cache: CacheEngine<String> = CacheEngine::with_storage(config(10), backend.clone());
        for key in ["a", "b", "c"] {
            cache.set(key, key.to_string(), "1h").unwrap();
            sleep(Duration::from_millis(2));
        }

        let reloaded: CacheEngine<String> = CacheEngine::with_storage(config(2), backend.clone());
        assert_eq!(reloaded.keys(), vec!["c", "b"]);
        assert!(backend.get_item("swr:a").unwrap().is_none());
    }

    #[test]
    fn test_quota_failure_does_not_fail_set() {
        // Room for the probe and roughly one record.
        let backend = Arc::new(MemoryStorage::with_quota(120));
        let cache: CacheEngine<String> = CacheEngine::with_storage(config(10), backend.clone());

        assert!(cache.set("big", "x".repeat(500), "1h").unwrap());
        assert_eq!(cache.get("big").map(|v| v.len()), Some(500));
        assert!(backend.get_item("swr:big").unwrap().is_none());
    }

    #[test]
    fn test_quota_failure_evicts_lru_once() {
        let backend = Arc::new(MemoryStorage::with_quota(250));
        let cache: CacheEngine<String> = CacheEngine::with_storage(config(10), backend.clone());

        cache.set("old", "x".repeat(60), "1h").unwrap();
        assert!(backend.get_item("swr:old").unwrap().is_some());

        cache.set("new", "y".repeat(60), "1h").unwrap();

        assert!(!cache.contains_key("old"));
        assert_eq!(cache.get("new").map(|v| v.len()), Some(60));
        assert!(backend.get_item("swr:new").unwrap().is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_unavailable_storage_runs_in_memory() {
        let backend = Arc::new(MemoryStorage::new());
        backend.set_unavailable(true);

        let cache: CacheEngine<String> = CacheEngine::with_storage(config(10), backend);
        assert!(cache.set("k", "v".to_string(), "1h").unwrap());
        assert_eq!(cache.get("k").as_deref(), Some("v"));

        let stats = cache.stats();
        assert!(!stats.storage_supported);
        assert!(!stats.persistence_enabled);
    }

    #[test]
    fn test_persist_disabled_by_config() {
        let backend = Arc::new(MemoryStorage::new());
        let cache: CacheEngine<String> = CacheEngine::with_storage(
            CacheConfig {
                persist: false,
                ..CacheConfig::default()
            },
            backend.clone(),
        );

        cache.set("k", "v".to_string(), "1h").unwrap();
        assert!(backend.is_empty());
        let stats = cache.stats();
        assert!(stats.storage_supported);
        assert!(!stats.persistence_enabled);
    }

    #[test]
    fn test_clear_matching_leaves_other_records() {
        let backend = Arc::new(MemoryStorage::new());
        let cache: CacheEngine<String> = CacheEngine::with_storage(config(10), backend.clone());

        cache.set("user:1", "a".to_string(), "1h").unwrap();
        cache.set("post:1", "b".to_string(), "1h").unwrap();
        cache.revalidation().subscribe("user:1", || {});
        cache.revalidation().subscribe("post:1", || {});

        cache.clear_matching("user:.*").unwrap();

        assert!(backend.get_item("swr:user:1").unwrap().is_none());
        assert!(backend.get_item("swr:post:1").unwrap().is_some());
        assert_eq!(cache.revalidation().watched_keys(), vec!["post:1".to_string()]);
    }

    #[test]
    fn test_engines_are_isolated() {
        let a = engine(10);
        let b = engine(10);

        a.set("k", "a".to_string(), "1h").unwrap();
        assert_eq!(b.get("k"), None);
    }

    #[test]
    fn test_global_instance_is_shared() {
        let key = "engine-tests:global";
        CacheEngine::global()
            .set(key, serde_json::json!({"n": 1}), "1m")
            .unwrap();
        assert_eq!(
            CacheEngine::global().get(key),
            Some(serde_json::json!({"n": 1}))
        );
        CacheEngine::global().remove(key);
    }
}
