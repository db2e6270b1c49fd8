//! Stale-While-Error Cache
//!
//! In-memory TTL cache with two age thresholds: entries younger than
//! `fresh_ttl` are served directly; entries younger than
//! `fresh_ttl + stale_ttl` are "stale but usable" and only served when the
//! live path fails. Older entries are evicted on read.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<V> {
    Fresh(V),
    Stale(V),
    Miss,
}

impl<V> CacheLookup<V> {
    pub fn fresh(self) -> Option<V> {
        match self {
            CacheLookup::Fresh(v) => Some(v),
            _ => None,
        }
    }

    /// Any usable value, fresh or stale
    pub fn usable(self) -> Option<V> {
        match self {
            CacheLookup::Fresh(v) | CacheLookup::Stale(v) => Some(v),
            CacheLookup::Miss => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub fresh_hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

pub struct StaleCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    fresh_ttl: Duration,
    stale_ttl: Duration,
    max_entries: usize,
    fresh_hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> StaleCache<V> {
    pub fn new(fresh_ttl: Duration, stale_ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            fresh_ttl,
            stale_ttl,
            max_entries: max_entries.max(1),
            fresh_hits: AtomicU64::new(0),
            stale_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> CacheLookup<V> {
        let lookup = match self.entries.get(key) {
            Some(entry) => {
                let age = entry.stored_at.elapsed();
                if age < self.fresh_ttl {
                    CacheLookup::Fresh(entry.value.clone())
                } else if age < self.fresh_ttl + self.stale_ttl {
                    CacheLookup::Stale(entry.value.clone())
                } else {
                    CacheLookup::Miss
                }
            }
            None => CacheLookup::Miss,
        };

        match &lookup {
            CacheLookup::Fresh(_) => {
                self.fresh_hits.fetch_add(1, Ordering::Relaxed);
            }
            CacheLookup::Stale(_) => {
                self.stale_hits.fetch_add(1, Ordering::Relaxed);
            }
            CacheLookup::Miss => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let max_age = self.fresh_ttl + self.stale_ttl;
                self.entries
                    .remove_if(key, |_, entry| entry.stored_at.elapsed() >= max_age);
            }
        }
        lookup
    }

    /// Store a value, replacing any previous entry for the key
    pub fn put(&self, key: &str, value: V) {
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(key) {
            self.evict();
        }
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            fresh_hits: self.fresh_hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    /// Drop expired entries, then the oldest entry if still at capacity
    fn evict(&self) {
        let max_age = self.fresh_ttl + self.stale_ttl;
        self.entries.retain(|_, entry| entry.stored_at.elapsed() < max_age);

        if self.entries.len() >= self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().stored_at)
                .map(|e| e.key().clone());
            if let Some(key) = oldest {
                self.entries.remove(&key);
            }
        }
    }
}
