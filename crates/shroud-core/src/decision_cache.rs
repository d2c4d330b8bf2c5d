//! Bounded verdict cache with per-entry expiry.
//!
//! Keys are `method:url` strings (exact, case-sensitive). Entries expire a
//! fixed TTL after they were written; an expired entry is treated as absent
//! and dropped when read. At capacity the least recently used entry is
//! evicted. A capacity of zero disables caching.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::config::FilterSettings;

#[derive(Debug, Clone, Copy)]
struct Entry {
    blocked: bool,
    expires_at: Instant,
}

/// Thread-safe LRU cache of block verdicts.
pub struct DecisionCache {
    entries: Option<Mutex<LruCache<String, Entry>>>,
    ttl: Duration,
}

impl std::fmt::Debug for DecisionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionCache")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl DecisionCache {
    /// Creates a cache holding at most `capacity` verdicts for `ttl` each.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            ttl,
        }
    }

    /// Creates a cache sized and timed by filter settings.
    pub fn from_settings(settings: &FilterSettings) -> Self {
        Self::new(
            settings.decision_cache_capacity,
            Duration::from_secs(settings.decision_cache_ttl_secs),
        )
    }

    /// Returns the cached verdict if present and fresh.
    pub fn lookup(&self, key: &str) -> Option<bool> {
        self.lookup_at(key, Instant::now())
    }

    /// Stores a verdict with a fresh expiry.
    pub fn store(&self, key: &str, blocked: bool) {
        self.store_at(key, blocked, Instant::now());
    }

    pub(crate) fn lookup_at(&self, key: &str, now: Instant) -> Option<bool> {
        let mut entries = self.entries.as_ref()?.lock();
        let entry = *entries.get(key)?;
        if now < entry.expires_at {
            return Some(entry.blocked);
        }
        entries.pop(key);
        None
    }

    pub(crate) fn store_at(&self, key: &str, blocked: bool, now: Instant) {
        if let Some(entries) = &self.entries {
            entries.lock().put(
                key.to_string(),
                Entry {
                    blocked,
                    expires_at: now + self.ttl,
                },
            );
        }
    }

    /// Number of entries held, including expired ones not yet read.
    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |e| e.lock().len())
    }

    /// Returns true if the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries; zero when disabled.
    pub fn capacity(&self) -> usize {
        self.entries.as_ref().map_or(0, |e| e.lock().cap().get())
    }

    /// Entry lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Drops every entry.
    pub fn clear(&self) {
        if let Some(entries) = &self.entries {
            entries.lock().clear();
        }
    }
}
