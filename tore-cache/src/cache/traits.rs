//! Cache backend trait and statistics.
//!
//! Every tier implements [`CacheBackend`] over opaque byte values; the
//! multi-level cache owns serialization and tier selection.

use std::time::Duration;
use tore_core::{CacheLevel, CacheResult};

/// Cache backend trait for pluggable cache tiers.
///
/// Implementations must be thread-safe: the multi-level cache is shared by
/// reference across callers.
///
/// # Expiry
///
/// Each tier enforces its own TTL. Reading an expired key must behave exactly
/// like reading an absent key (`Ok(None)`), never an error.
///
/// # Errors
///
/// Operation errors are returned to the multi-level cache, which logs and
/// counts them and treats the tier as having no value. Implementations should
/// not retry.
pub trait CacheBackend: Send + Sync {
    /// The tier this backend serves.
    fn level(&self) -> CacheLevel;

    /// Get a value, or `None` if absent or expired.
    fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Store a value, overwriting any previous one.
    ///
    /// Returns the number of other entries evicted to make room.
    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<u64>;

    /// Delete a value. Returns whether a live entry was removed.
    fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Remaining time-to-live, or `None` if the key is absent or never expires.
    fn ttl(&self, key: &str) -> CacheResult<Option<Duration>>;

    /// Remove every entry owned by this backend. Returns the number removed.
    fn clear(&self) -> CacheResult<u64>;

    /// Current statistics.
    fn stats(&self) -> CacheStats;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate storage usage in bytes.
    pub memory_bytes: u64,
    /// Number of evictions due to capacity.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
