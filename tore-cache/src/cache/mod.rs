//! Tiered cache backends and the multi-level cache that composes them.
//!
//! Each tier implements [`CacheBackend`] over byte values:
//!
//! | tier   | backend                  | expiry                    | capacity            |
//! |--------|--------------------------|---------------------------|---------------------|
//! | memory | [`MemoryCacheBackend`]   | per entry, default TTL    | LRU by entry count  |
//! | disk   | [`DiskCacheBackend`]     | [`CacheEntry`] header     | oldest-first, bytes |
//! | redis  | [`RedisCacheBackend`]    | native `PSETEX`           | server policy       |
//! | object | [`ObjectStorageBackend`] | [`CacheEntry`] header     | unbounded           |
//!
//! [`MultiLevelCache`] holds them as an ordered list and owns serialization,
//! tier selection, promotion and metrics.

pub mod disk_backend;
pub mod entry;
pub mod memory_backend;
pub mod multi_level;
pub mod object_backend;
pub mod object_store;
pub mod redis_backend;
pub mod traits;

pub use disk_backend::{DiskCacheBackend, DiskCacheError};
pub use entry::CacheEntry;
pub use memory_backend::MemoryCacheBackend;
pub use multi_level::MultiLevelCache;
pub use object_backend::ObjectStorageBackend;
pub use object_store::{LocalObjectStore, ObjectStore};
pub use redis_backend::RedisCacheBackend;
pub use traits::{CacheBackend, CacheStats};
