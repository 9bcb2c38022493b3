//! In-memory result cache keyed by request fingerprint.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use dashmap::DashMap;

use crate::config::SharedConfig;
use crate::Fingerprint;

/// Per-call cache behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Read a live entry if present; otherwise fetch and write the result. (Default)
    #[default]
    Use,
    /// Skip the read, fetch, and overwrite the entry with the new result.
    Refresh,
    /// Neither read nor write.
    Bypass,
}

impl CacheMode {
    pub const fn reads(self) -> bool {
        matches!(self, Self::Use)
    }

    pub const fn writes(self) -> bool {
        !matches!(self, Self::Bypass)
    }
}

/// Entry count at which `put` first sweeps expired entries.
const SWEEP_THRESHOLD: usize = 1024;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    /// `None` when the TTL reaches past the clock's range.
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| now <= expires_at)
    }
}

/// Thread-safe TTL cache.
///
/// The enabled flag and TTL are read from the shared configuration on every
/// call. An entry is live while `now <= expires_at`; reads past that point
/// are misses and evict the entry. Once the map grows past a watermark,
/// `put` also sweeps expired entries for other keys.
#[derive(Debug)]
pub struct ResultCache<V> {
    config: SharedConfig,
    entries: DashMap<Fingerprint, CacheEntry<V>>,
    sweep_at: AtomicUsize,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(config: SharedConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            sweep_at: AtomicUsize::new(SWEEP_THRESHOLD),
        }
    }

    pub fn get(&self, key: &Fingerprint, now: Instant) -> Option<V> {
        if !self.config.cache().enabled {
            return None;
        }

        let expired = {
            let entry = self.entries.get(key)?;
            if entry.is_live(now) {
                return Some(entry.value.clone());
            }
            entry.expires_at
        };

        // Only evict the entry we saw; a concurrent writer may have replaced it.
        self.entries.remove_if(key, |_, entry| entry.expires_at == expired);
        None
    }

    pub fn put(&self, key: Fingerprint, value: V, now: Instant) {
        let cache = self.config.cache();
        if !cache.enabled {
            return;
        }

        self.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: now,
                expires_at: now.checked_add(cache.ttl),
            },
        );

        if self.entries.len() >= self.sweep_at.load(Ordering::Relaxed) {
            self.purge_expired(now);
            let next = (self.entries.len() * 2).max(SWEEP_THRESHOLD);
            self.sweep_at.store(next, Ordering::Relaxed);
        }
    }

    /// When the live entry for `key` was stored.
    pub fn stored_at(&self, key: &Fingerprint, now: Instant) -> Option<Instant> {
        self.entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.stored_at)
    }

    pub fn purge_expired(&self, now: Instant) {
        self.entries.retain(|_, entry| entry.is_live(now));
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
