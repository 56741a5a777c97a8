//! In-memory key/value cache with per-entry expiration.
//!
//! Entries are evicted lazily: a read that finds a stale entry removes it.
//! There is no background sweeper, so memory is only reclaimed for keys that
//! are read again or deleted explicitly.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

/// When a cached value stops being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    /// Relative to the moment of insertion.
    After(Duration),
    /// Absolute wall-clock deadline.
    At(DateTime<Utc>),
}

impl Expiration {
    fn deadline(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Expiration::After(ttl) => match chrono::Duration::from_std(ttl) {
                Ok(ttl) => now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
                Err(_) => DateTime::<Utc>::MAX_UTC,
            },
            Expiration::At(deadline) => deadline,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// Thread-safe expiring cache.
///
/// A single mutex guards the whole map; every operation holds it for O(1)
/// work only.
#[derive(Debug)]
pub struct ExpiringCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V> Default for ExpiringCache<V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: Clone> ExpiringCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn set(&self, key: impl Into<String>, value: V, expiration: Expiration) {
        let key = key.into();
        let now = Utc::now();
        let expires_at = expiration.deadline(now);

        debug!(
            key = %key,
            expires_at = %expires_at,
            now = %now,
            "cache_set"
        );

        self.lock().insert(key, CacheEntry { value, expires_at });
    }

    /// Return the value for `key` unless it was never set or has expired.
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Utc::now())
    }

    fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<V> {
        let mut entries = self.lock();

        let Some(entry) = entries.get(key) else {
            debug!(key = %key, "cache_miss");
            return None;
        };

        if now >= entry.expires_at {
            debug!(
                key = %key,
                expired_at = %entry.expires_at,
                now = %now,
                "cache_expired"
            );
            entries.remove(key);
            return None;
        }

        debug!(key = %key, expires_at = %entry.expires_at, "cache_hit");
        Some(entry.value.clone())
    }

    /// Remove `key`. No-op when absent.
    pub fn delete(&self, key: &str) {
        if self.lock().remove(key).is_some() {
            debug!(key = %key, "cache_deleted");
        }
    }

    /// Deadline of a live entry.
    pub fn expires_at(&self, key: &str) -> Option<DateTime<Utc>> {
        let now = Utc::now();
        self.lock()
            .get(key)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| entry.expires_at)
    }

    /// Number of stored entries, stale ones included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        // A panic while holding the lock cannot leave an entry half-written.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
