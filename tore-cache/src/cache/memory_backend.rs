//! In-process memory tier.
//!
//! An LRU map bounded by entry count, with a per-entry deadline. Entries
//! written without a TTL get the configured default TTL.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use tore_core::{CacheError, CacheLevel, CacheResult};

use super::traits::{CacheBackend, CacheStats};

#[derive(Debug)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug)]
struct MemoryInner {
    entries: LruCache<String, MemoryEntry>,
    stats: CacheStats,
}

impl MemoryInner {
    fn remove(&mut self, key: &str) -> Option<MemoryEntry> {
        let removed = self.entries.pop(key);
        if let Some(entry) = &removed {
            self.stats.entry_count = self.stats.entry_count.saturating_sub(1);
            self.stats.memory_bytes = self
                .stats
                .memory_bytes
                .saturating_sub(entry_size(key, &entry.value));
        }
        removed
    }
}

fn entry_size(key: &str, value: &[u8]) -> u64 {
    (key.len() + value.len()) as u64
}

/// LRU + TTL memory cache.
#[derive(Debug)]
pub struct MemoryCacheBackend {
    inner: Mutex<MemoryInner>,
    default_ttl: Duration,
}

impl MemoryCacheBackend {
    /// Create a memory tier holding at most `capacity` entries.
    ///
    /// A zero capacity is treated as one.
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(MemoryInner {
                entries: LruCache::new(capacity),
                stats: CacheStats::default(),
            }),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn lock(&self) -> CacheResult<std::sync::MutexGuard<'_, MemoryInner>> {
        self.inner.lock().map_err(|_| CacheError::LockPoisoned {
            level: CacheLevel::Memory,
        })
    }
}

impl CacheBackend for MemoryCacheBackend {
    fn level(&self) -> CacheLevel {
        CacheLevel::Memory
    }

    fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        let now = Instant::now();

        let expired = match inner.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                let value = entry.value.clone();
                inner.stats.hits += 1;
                return Ok(Some(value));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.remove(key);
        }
        inner.stats.misses += 1;
        Ok(None)
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<u64> {
        let mut inner = self.lock()?;
        let entry = MemoryEntry {
            value: value.to_vec(),
            expires_at: Instant::now() + ttl.unwrap_or(self.default_ttl),
        };

        // Drop the previous value first so `push` can only return an eviction.
        inner.remove(key);
        let mut evicted = 0;
        if let Some((evicted_key, evicted_entry)) = inner.entries.push(key.to_string(), entry) {
            inner.stats.entry_count = inner.stats.entry_count.saturating_sub(1);
            inner.stats.memory_bytes = inner
                .stats
                .memory_bytes
                .saturating_sub(entry_size(&evicted_key, &evicted_entry.value));
            inner.stats.evictions += 1;
            evicted = 1;
        }
        inner.stats.entry_count += 1;
        inner.stats.memory_bytes += entry_size(key, value);
        Ok(evicted)
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut inner = self.lock()?;
        let now = Instant::now();
        Ok(inner
            .remove(key)
            .is_some_and(|entry| !entry.is_expired(now)))
    }

    fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let inner = self.lock()?;
        let now = Instant::now();
        Ok(inner
            .entries
            .peek(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.expires_at.saturating_duration_since(now)))
    }

    fn clear(&self) -> CacheResult<u64> {
        let mut inner = self.lock()?;
        let removed = inner.entries.len() as u64;
        inner.entries.clear();
        inner.stats.entry_count = 0;
        inner.stats.memory_bytes = 0;
        Ok(removed)
    }

    fn stats(&self) -> CacheStats {
        self.inner
            .lock()
            .map(|inner| inner.stats.clone())
            .unwrap_or_default()
    }
}
