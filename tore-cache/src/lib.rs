//! TORE Cache - Tiered Caching and Metrics
//!
//! A multi-level cache over memory, LMDB disk, Redis and object storage, a
//! per-tier metrics monitor, and the [`CacheContext`] that ties them to one
//! shared configuration.

pub mod cache;
pub mod context;
pub mod monitor;

pub use cache::{
    CacheBackend, CacheEntry, CacheStats, DiskCacheBackend, DiskCacheError, LocalObjectStore,
    MemoryCacheBackend, MultiLevelCache, ObjectStorageBackend, ObjectStore, RedisCacheBackend,
};
pub use context::CacheContext;
pub use monitor::{
    CacheMetrics, CacheMonitor, LatencyHistogram, LatencySummary, LevelSummary, MetricsSummary,
    LATENCY_BUCKETS_MS,
};
