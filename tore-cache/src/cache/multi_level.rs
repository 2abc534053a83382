//! Multi-level cache orchestration.
//!
//! Routes reads through tiers in priority order, promotes hits into faster
//! tiers, picks write tiers by serialized size, and records metrics for
//! every tier operation.
//!
//! Tier failures never reach callers: each one is logged, counted on the
//! monitor and treated as "no value" for that tier while the remaining
//! tiers carry on. There is no retry and no rollback across tiers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tore_core::{CacheConfig, CacheError, CacheLevel, CacheResult};

use super::disk_backend::DiskCacheBackend;
use super::memory_backend::MemoryCacheBackend;
use super::object_backend::ObjectStorageBackend;
use super::redis_backend::RedisCacheBackend;
use super::traits::{CacheBackend, CacheStats};
use crate::monitor::CacheMonitor;

/// Tiered cache over an ordered list of [`CacheBackend`]s.
///
/// # Example
///
/// ```ignore
/// let cache = MultiLevelCache::new(config, monitor)?;
/// cache.set("result:doc1", &result, None, None);
/// let cached: Option<ProcessingResult> = cache.get("result:doc1", None);
/// ```
pub struct MultiLevelCache {
    config: Arc<CacheConfig>,
    monitor: Arc<CacheMonitor>,
    /// Sorted by [`CacheLevel`] priority.
    backends: Vec<Box<dyn CacheBackend>>,
}

impl std::fmt::Debug for MultiLevelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiLevelCache")
            .field("levels", &self.levels())
            .finish_non_exhaustive()
    }
}

impl MultiLevelCache {
    /// Build every tier `config` enables.
    ///
    /// # Errors
    ///
    /// Fails if a tier cannot be opened or connected: an unreachable Redis
    /// server, an LMDB environment that cannot be created, or object storage
    /// enabled without `s3_config`.
    pub fn new(config: Arc<CacheConfig>, monitor: Arc<CacheMonitor>) -> CacheResult<Self> {
        let mut backends: Vec<Box<dyn CacheBackend>> = Vec::new();

        for level in config.enabled_levels() {
            let backend: Box<dyn CacheBackend> = match level {
                CacheLevel::Memory => Box::new(MemoryCacheBackend::new(
                    config.memory_cache_size,
                    config.memory_cache_ttl,
                )),
                CacheLevel::Disk => {
                    let Some(path) = config.disk_cache_path.as_ref() else {
                        continue;
                    };
                    Box::new(DiskCacheBackend::new(path, config.disk_cache_size)?)
                }
                CacheLevel::Redis => Box::new(RedisCacheBackend::connect(&config)?),
                CacheLevel::Object => {
                    let s3 = config.s3_config.as_ref().ok_or_else(|| CacheError::Connection {
                        level: CacheLevel::Object,
                        reason: "object storage enabled without s3_config".to_string(),
                    })?;
                    Box::new(ObjectStorageBackend::open_local(s3)?)
                }
            };
            backends.push(backend);
        }

        tracing::info!(
            levels = ?backends.iter().map(|b| b.level()).collect::<Vec<_>>(),
            "Multi-level cache initialized"
        );
        Ok(Self::with_backends(config, monitor, backends))
    }

    /// Use caller-supplied tiers. They are reordered by priority.
    pub fn with_backends(
        config: Arc<CacheConfig>,
        monitor: Arc<CacheMonitor>,
        mut backends: Vec<Box<dyn CacheBackend>>,
    ) -> Self {
        backends.sort_by_key(|b| b.level());
        Self {
            config,
            monitor,
            backends,
        }
    }

    pub fn config(&self) -> &Arc<CacheConfig> {
        &self.config
    }

    pub fn monitor(&self) -> &Arc<CacheMonitor> {
        &self.monitor
    }

    /// Configured tiers in priority order.
    pub fn levels(&self) -> Vec<CacheLevel> {
        self.backends.iter().map(|b| b.level()).collect()
    }

    /// Statistics reported by one tier's backend.
    pub fn backend_stats(&self, level: CacheLevel) -> Option<CacheStats> {
        self.backends
            .iter()
            .find(|b| b.level() == level)
            .map(|b| b.stats())
    }

    fn selected<'a>(
        &'a self,
        levels: Option<&'a [CacheLevel]>,
    ) -> impl Iterator<Item = &'a dyn CacheBackend> + 'a {
        self.backends
            .iter()
            .map(|b| b.as_ref())
            .filter(move |b| levels.map_or(true, |ls| ls.contains(&b.level())))
    }

    fn tier_failed(&self, level: CacheLevel, operation: &str, key: &str, err: &CacheError) {
        tracing::warn!(
            level = %level,
            operation,
            key,
            error = %err,
            "Cache tier operation failed"
        );
        self.monitor.record_error(level, err.kind());
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Look up `key` and deserialize it.
    ///
    /// A stored value that does not deserialize as `T` is counted as a
    /// serialization error on the tier that returned it and reported as a
    /// miss.
    pub fn get<T: DeserializeOwned>(&self, key: &str, levels: Option<&[CacheLevel]>) -> Option<T> {
        let (level, bytes) = self.lookup(key, levels)?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                let err = CacheError::Serialization {
                    reason: e.to_string(),
                };
                self.tier_failed(level, "get", key, &err);
                None
            }
        }
    }

    /// Look up the raw bytes stored under `key`.
    pub fn get_raw(&self, key: &str, levels: Option<&[CacheLevel]>) -> Option<Vec<u8>> {
        self.lookup(key, levels).map(|(_, bytes)| bytes)
    }

    fn lookup(&self, key: &str, levels: Option<&[CacheLevel]>) -> Option<(CacheLevel, Vec<u8>)> {
        let mut checked: Vec<&dyn CacheBackend> = Vec::new();

        for backend in self.selected(levels) {
            let level = backend.level();
            let start = Instant::now();
            let result = backend.get(key);
            self.monitor.record_latency(level, "get", start.elapsed());

            match result {
                Ok(Some(bytes)) => {
                    self.monitor.record_hit(level);
                    tracing::debug!(level = %level, key, "Cache hit");
                    if !checked.is_empty() {
                        self.promote(key, &bytes, backend, &checked);
                    }
                    return Some((level, bytes));
                }
                Ok(None) => {
                    self.monitor.record_miss(level);
                }
                Err(e) => {
                    self.tier_failed(level, "get", key, &e);
                    self.monitor.record_miss(level);
                }
            }
            checked.push(backend);
        }

        tracing::debug!(key, "Cache miss on all tiers");
        None
    }

    /// Copy a hit from `source` into every faster tier checked before it,
    /// keeping the remaining TTL of the source entry.
    fn promote(
        &self,
        key: &str,
        bytes: &[u8],
        source: &dyn CacheBackend,
        faster: &[&dyn CacheBackend],
    ) {
        let ttl = match source.ttl(key) {
            Ok(ttl) => ttl,
            Err(e) => {
                self.tier_failed(source.level(), "ttl", key, &e);
                None
            }
        };
        for backend in faster {
            if self.write_tier(*backend, key, bytes, ttl) {
                tracing::debug!(
                    from = %source.level(),
                    to = %backend.level(),
                    key,
                    "Promoted cache entry"
                );
            }
        }
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Serialize and store `value`.
    ///
    /// With `levels == None` the tiers are picked by
    /// [`determine_cache_levels`](Self::determine_cache_levels). Returns the
    /// tiers that accepted the write.
    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        levels: Option<&[CacheLevel]>,
    ) -> Vec<CacheLevel> {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                let err = CacheError::Serialization {
                    reason: e.to_string(),
                };
                let targets = levels.map(<[CacheLevel]>::to_vec).unwrap_or_else(|| self.levels());
                for level in targets {
                    self.tier_failed(level, "set", key, &err);
                }
                return Vec::new();
            }
        };
        self.set_raw(key, &bytes, ttl, levels)
    }

    /// Store pre-serialized bytes. Tier selection is by `bytes.len()`.
    pub fn set_raw(
        &self,
        key: &str,
        bytes: &[u8],
        ttl: Option<Duration>,
        levels: Option<&[CacheLevel]>,
    ) -> Vec<CacheLevel> {
        let targets = match levels {
            Some(levels) => levels.to_vec(),
            None => self.levels_for_size(bytes.len()),
        };

        let mut written = Vec::with_capacity(targets.len());
        for backend in self.selected(Some(targets.as_slice())) {
            if self.write_tier(backend, key, bytes, ttl) {
                written.push(backend.level());
            }
        }
        written
    }

    fn write_tier(
        &self,
        backend: &dyn CacheBackend,
        key: &str,
        bytes: &[u8],
        ttl: Option<Duration>,
    ) -> bool {
        let level = backend.level();
        let start = Instant::now();
        let result = backend.set(key, bytes, ttl);
        self.monitor.record_latency(level, "set", start.elapsed());

        match result {
            Ok(evicted) => {
                self.monitor.record_eviction(level, evicted);
                self.monitor.record_size(level, backend.stats().memory_bytes);
                true
            }
            Err(e) => {
                self.tier_failed(level, "set", key, &e);
                false
            }
        }
    }

    /// Tiers a value would be written to, by serialized size.
    pub fn determine_cache_levels<T: Serialize + ?Sized>(&self, value: &T) -> Vec<CacheLevel> {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.levels_for_size(bytes.len()),
            Err(_) => Vec::new(),
        }
    }

    /// Size policy, restricted to configured tiers:
    ///
    /// - `size < small_value_threshold`: memory, disk, redis
    /// - `size <= large_value_threshold`: disk, redis, object
    /// - larger: object only
    pub fn levels_for_size(&self, size: usize) -> Vec<CacheLevel> {
        let policy: &[CacheLevel] = if size < self.config.small_value_threshold {
            &[CacheLevel::Memory, CacheLevel::Disk, CacheLevel::Redis]
        } else if size <= self.config.large_value_threshold {
            &[CacheLevel::Disk, CacheLevel::Redis, CacheLevel::Object]
        } else {
            &[CacheLevel::Object]
        };
        let configured = self.levels();
        policy
            .iter()
            .copied()
            .filter(|level| configured.contains(level))
            .collect()
    }

    /// Delete `key` from the selected tiers. Returns whether any tier held it.
    pub fn delete(&self, key: &str, levels: Option<&[CacheLevel]>) -> bool {
        let mut removed = false;
        for backend in self.selected(levels) {
            let level = backend.level();
            let start = Instant::now();
            let result = backend.delete(key);
            self.monitor.record_latency(level, "delete", start.elapsed());
            match result {
                Ok(hit) => {
                    removed |= hit;
                    self.monitor.record_size(level, backend.stats().memory_bytes);
                }
                Err(e) => self.tier_failed(level, "delete", key, &e),
            }
        }
        removed
    }

    /// Empty the selected tiers. Returns the number of entries removed.
    pub fn clear(&self, levels: Option<&[CacheLevel]>) -> u64 {
        let mut removed = 0;
        for backend in self.selected(levels) {
            let level = backend.level();
            match backend.clear() {
                Ok(n) => {
                    removed += n;
                    self.monitor.record_size(level, backend.stats().memory_bytes);
                }
                Err(e) => self.tier_failed(level, "clear", "*", &e),
            }
        }
        tracing::info!(removed, "Cleared cache tiers");
        removed
    }
}
