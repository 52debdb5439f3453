use std::collections::HashMap;

use serde::Serialize;
use sha2::{Digest, Sha256};
use strategy_core::Bar;

/// Stable hash of (bars identity ‖ canonical config JSON), usable as a
/// cache key or session id. Bars are identified by endpoints and length so
/// keying stays O(1) on long series.
pub fn stable_key<C: Serialize>(bars: &[Bar], config: &C) -> String {
    let mut hasher = Sha256::new();
    if let Some(first) = bars.first() {
        hasher.update(first.time.to_le_bytes());
    }
    if let Some(last) = bars.last() {
        hasher.update(last.time.to_le_bytes());
    }
    hasher.update((bars.len() as u64).to_le_bytes());
    if let Ok(json) = serde_json::to_vec(config) {
        hasher.update(&json);
    }
    hex::encode(hasher.finalize())
}

struct CacheEntry<T> {
    value: T,
    inserted_ms: i64,
    last_used: u64,
}

/// Caller-owned LRU for pipeline results, bounded by entry count and TTL.
///
/// The caller supplies `now_ms` on every call; the cache itself never reads
/// a clock, so cached pipelines stay deterministic.
pub struct ResultCache<T> {
    capacity: usize,
    ttl_ms: i64,
    tick: u64,
    entries: HashMap<String, CacheEntry<T>>,
}

impl<T> ResultCache<T> {
    /// `ttl_ms = 0` disables expiry.
    pub fn new(capacity: usize, ttl_ms: i64) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl_ms,
            tick: 0,
            entries: HashMap::new(),
        }
    }

    pub fn get(&mut self, key: &str, now_ms: i64) -> Option<&T> {
        let expired = match self.entries.get(key) {
            Some(entry) => self.ttl_ms > 0 && now_ms - entry.inserted_ms > self.ttl_ms,
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.tick += 1;
        let entry = self.entries.get_mut(key)?;
        entry.last_used = self.tick;
        Some(&entry.value)
    }

    pub fn insert(&mut self, key: String, value: T, now_ms: i64) {
        self.tick += 1;
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_ms: now_ms,
                last_used: self.tick,
            },
        );
        if self.entries.len() > self.capacity {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
