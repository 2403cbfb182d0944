//! Revalidation Registry
//!
//! Per-key callback sets that external triggers (focus, reconnect, timers)
//! use to tell consumers a key should be fetched again.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

/// Callback invoked when a key should revalidate.
pub type RevalidateFn = Arc<dyn Fn() + Send + Sync>;

/// Identifies one subscription; closures cannot be compared directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

// == Revalidation Registry ==
#[derive(Default)]
pub struct RevalidationRegistry {
    subscribers: Mutex<HashMap<String, HashMap<SubscriptionId, RevalidateFn>>>,
    next_id: AtomicU64,
}

impl RevalidationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // == Subscribe ==
    /// Registers `callback` for `key`. A key can have many subscribers.
    pub fn subscribe<F>(&self, key: &str, callback: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .entry(key.to_string())
            .or_default()
            .insert(id, Arc::new(callback));
        id
    }

    // == Unsubscribe ==
    /// Removes one subscription, dropping the key once it has none left.
    pub fn unsubscribe(&self, key: &str, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let Some(set) = subscribers.get_mut(key) else {
            return false;
        };
        let removed = set.remove(&id).is_some();
        if set.is_empty() {
            subscribers.remove(key);
        }
        removed
    }

    // == Notify ==
    /// Invokes every callback registered for `key`. Returns how many ran.
    pub fn notify(&self, key: &str) -> usize {
        let callbacks: Vec<RevalidateFn> = self
            .subscribers
            .lock()
            .get(key)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default();
        invoke_all(&callbacks)
    }

    /// Invokes every callback for every key.
    pub fn notify_all(&self) -> usize {
        let callbacks: Vec<RevalidateFn> = self
            .subscribers
            .lock()
            .values()
            .flat_map(|set| set.values().cloned())
            .collect();
        invoke_all(&callbacks)
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.subscribers.lock().get(key).map_or(0, HashMap::len)
    }

    /// Keys with at least one subscriber.
    pub fn watched_keys(&self) -> Vec<String> {
        self.subscribers.lock().keys().cloned().collect()
    }

    /// Drops every subscription.
    pub fn clear(&self) {
        self.subscribers.lock().clear();
    }

    /// Drops subscriptions for keys matching `pred`.
    pub fn clear_matching<P>(&self, pred: P)
    where
        P: Fn(&str) -> bool,
    {
        self.subscribers.lock().retain(|key, _| !pred(key));
    }
}

impl std::fmt::Debug for RevalidationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevalidationRegistry")
            .field("watched_keys", &self.subscribers.lock().len())
            .finish()
    }
}

// Callbacks run outside the lock so they may subscribe or unsubscribe.
fn invoke_all(callbacks: &[RevalidateFn]) -> usize {
    for callback in callbacks {
        if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
            warn!("revalidation callback panicked");
        }
    }
    callbacks.len()
}
