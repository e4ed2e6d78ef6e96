//! Generic TTL-bounded key/value store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::time::{Duration, Instant};

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Mutex-guarded map whose entries become invisible once their TTL elapses.
///
/// Expiry is passive: reads treat an expired entry as a miss and drop it.
/// [`TtlCache::purge_expired`] is available for an optional sweeper.
#[derive(Debug, Clone)]
pub struct TtlCache<V> {
    entries: Arc<Mutex<HashMap<String, Entry<V>>>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry<V>>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fetch a live value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if Instant::now() < entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert or replace `key`, restarting its TTL.
    pub fn set(&self, key: impl Into<String>, value: V) {
        let expires_at = Instant::now() + self.ttl;
        self.lock().insert(key.into(), Entry { value, expires_at });
    }

    /// Remove `key`. Returns `true` if a live entry was removed.
    pub fn delete(&self, key: &str) -> bool {
        self.lock()
            .remove(key)
            .is_some_and(|e| Instant::now() < e.expires_at)
    }

    /// Drop all expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| now < e.expires_at);
        before - entries.len()
    }

    /// Number of stored entries, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
