//! Object storage tier.
//!
//! Stores [`CacheEntry`]-encoded objects in an [`ObjectStore`]. The tier has
//! no capacity bound of its own; expired objects are deleted when read.

use std::sync::Mutex;
use std::time::Duration;

use tore_core::{CacheLevel, CacheResult, S3Config};

use super::entry::CacheEntry;
use super::object_store::{LocalObjectStore, ObjectStore};
use super::traits::{CacheBackend, CacheStats};

/// Cache tier over an object store.
pub struct ObjectStorageBackend {
    store: Box<dyn ObjectStore>,
    stats: Mutex<CacheStats>,
}

impl ObjectStorageBackend {
    /// Use an arbitrary store, counting the objects it already holds.
    pub fn new(store: Box<dyn ObjectStore>) -> CacheResult<Self> {
        let mut stats = CacheStats::default();
        for key in store.list_objects()? {
            if let Some(len) = store.object_len(&key)? {
                stats.entry_count += 1;
                stats.memory_bytes += len;
            }
        }
        Ok(Self {
            store,
            stats: Mutex::new(stats),
        })
    }

    /// Open a directory-backed bucket described by `config`.
    pub fn open_local(config: &S3Config) -> CacheResult<Self> {
        tracing::info!(
            bucket = %config.bucket,
            prefix = %config.prefix,
            region = %config.region,
            "Opening object storage cache tier"
        );
        Self::new(Box::new(LocalObjectStore::open(config)?))
    }

    fn update<F: FnOnce(&mut CacheStats)>(&self, f: F) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }

    fn remove(&self, key: &str) -> CacheResult<Option<u64>> {
        let len = self.store.object_len(key)?;
        if len.is_some() && self.store.delete_object(key)? {
            self.update(|s| {
                s.entry_count = s.entry_count.saturating_sub(1);
                s.memory_bytes = s.memory_bytes.saturating_sub(len.unwrap_or(0));
            });
            return Ok(len);
        }
        Ok(None)
    }

    fn read_live(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let Some(bytes) = self.store.get_object(key)? else {
            return Ok(None);
        };
        let entry = CacheEntry::decode(CacheLevel::Object, &bytes)?;
        if entry.is_expired() {
            self.remove(key)?;
            return Ok(None);
        }
        Ok(Some(entry))
    }
}

impl CacheBackend for ObjectStorageBackend {
    fn level(&self) -> CacheLevel {
        CacheLevel::Object
    }

    fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let entry = self.read_live(key)?;
        let hit = entry.is_some();
        self.update(|s| {
            if hit {
                s.hits += 1;
            } else {
                s.misses += 1;
            }
        });
        Ok(entry.map(|e| e.payload))
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<u64> {
        let encoded = CacheEntry::new(value, ttl).encode();
        let previous = self.store.object_len(key)?;
        self.store.put_object(key, &encoded)?;
        let len = encoded.len() as u64;
        self.update(|s| {
            match previous {
                Some(old) => s.memory_bytes = s.memory_bytes.saturating_sub(old),
                None => s.entry_count += 1,
            }
            s.memory_bytes += len;
        });
        Ok(0)
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        let live = self.read_live(key)?.is_some();
        if live {
            self.remove(key)?;
        }
        Ok(live)
    }

    fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        Ok(self.read_live(key)?.and_then(|entry| entry.remaining()))
    }

    fn clear(&self) -> CacheResult<u64> {
        let mut removed = 0;
        for key in self.store.list_objects()? {
            if self.store.delete_object(&key)? {
                removed += 1;
            }
        }
        self.update(|s| {
            s.entry_count = 0;
            s.memory_bytes = 0;
        });
        Ok(removed)
    }

    fn stats(&self) -> CacheStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}
