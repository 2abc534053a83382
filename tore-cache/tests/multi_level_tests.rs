//! Multi-level cache behaviour across real and fault-injected tiers.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tore_cache::{
    CacheBackend, CacheMonitor, DiskCacheBackend, MemoryCacheBackend, MultiLevelCache,
    ObjectStorageBackend,
};
use tore_core::{CacheConfig, CacheLevel, S3Config};
use tore_test_utils::fixtures::test_cache;
use tore_test_utils::{init_test_tracing, FailingBackend};

fn three_tier_cache(dir: &TempDir, small: usize, large: usize) -> MultiLevelCache {
    let config = CacheConfig::default()
        .with_disk_cache(dir.path().join("disk"), 4 * 1024 * 1024)
        .with_object_storage(S3Config::new("bucket", dir.path().join("objects")))
        .with_size_thresholds(small, large);
    let backends: Vec<Box<dyn CacheBackend>> = vec![
        Box::new(
            ObjectStorageBackend::open_local(config.s3_config.as_ref().unwrap()).unwrap(),
        ),
        Box::new(MemoryCacheBackend::new(64, Duration::from_secs(60))),
        Box::new(DiskCacheBackend::new(dir.path().join("disk"), 4 * 1024 * 1024).unwrap()),
    ];
    MultiLevelCache::with_backends(
        Arc::new(config),
        Arc::new(CacheMonitor::new(dir.path().join("metrics"))),
        backends,
    )
}

#[test]
fn test_set_then_get_returns_value() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();
    let cache = test_cache(dir.path());

    let written = cache.set("result:doc1", &vec!["a", "b"], None, None);
    assert_eq!(written, vec![CacheLevel::Memory, CacheLevel::Disk]);
    assert_eq!(
        cache.get::<Vec<String>>("result:doc1", None),
        Some(vec!["a".to_string(), "b".to_string()])
    );
    assert_eq!(
        cache.get::<Vec<String>>("result:doc1", Some(&[CacheLevel::Disk])),
        Some(vec!["a".to_string(), "b".to_string()])
    );
}

#[test]
fn test_backends_are_sorted_by_priority() {
    let dir = TempDir::new().unwrap();
    let cache = three_tier_cache(&dir, 16, 64);
    assert_eq!(
        cache.levels(),
        vec![CacheLevel::Memory, CacheLevel::Disk, CacheLevel::Object]
    );
}

#[test]
fn test_disk_hit_is_promoted_to_memory() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();
    let cache = test_cache(dir.path());

    cache.set("page:doc1:1", &"derived", None, Some(&[CacheLevel::Disk]));
    assert_eq!(cache.get::<String>("page:doc1:1", Some(&[CacheLevel::Memory])), None);

    assert_eq!(
        cache.get::<String>("page:doc1:1", None),
        Some("derived".to_string())
    );
    let monitor = cache.monitor();
    assert_eq!(monitor.metrics(CacheLevel::Memory).misses, 2);
    assert_eq!(monitor.metrics(CacheLevel::Disk).hits, 1);

    // Now served from memory without touching disk.
    assert_eq!(
        cache.get::<String>("page:doc1:1", None),
        Some("derived".to_string())
    );
    assert_eq!(monitor.metrics(CacheLevel::Memory).hits, 1);
    assert_eq!(monitor.metrics(CacheLevel::Disk).hits, 1);
}

#[test]
fn test_promotion_only_fills_faster_tiers() {
    let dir = TempDir::new().unwrap();
    let cache = three_tier_cache(&dir, 1024, 4096);

    cache.set("k", &7u32, None, Some(&[CacheLevel::Disk]));
    assert_eq!(cache.get::<u32>("k", None), Some(7));

    assert_eq!(cache.backend_stats(CacheLevel::Memory).unwrap().entry_count, 1);
    assert_eq!(cache.backend_stats(CacheLevel::Object).unwrap().entry_count, 0);
}

#[test]
fn test_promotion_keeps_source_ttl() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig::default()
        .with_disk_cache(dir.path().join("disk"), 4 * 1024 * 1024);
    let memory = Arc::new(MemoryCacheBackend::new(8, Duration::from_secs(3600)));

    struct Shared(Arc<MemoryCacheBackend>);
    impl CacheBackend for Shared {
        fn level(&self) -> CacheLevel {
            self.0.level()
        }
        fn get(&self, key: &str) -> tore_core::CacheResult<Option<Vec<u8>>> {
            self.0.get(key)
        }
        fn set(&self, key: &str, v: &[u8], ttl: Option<Duration>) -> tore_core::CacheResult<u64> {
            self.0.set(key, v, ttl)
        }
        fn delete(&self, key: &str) -> tore_core::CacheResult<bool> {
            self.0.delete(key)
        }
        fn ttl(&self, key: &str) -> tore_core::CacheResult<Option<Duration>> {
            self.0.ttl(key)
        }
        fn clear(&self) -> tore_core::CacheResult<u64> {
            self.0.clear()
        }
        fn stats(&self) -> tore_cache::CacheStats {
            self.0.stats()
        }
    }

    let cache = MultiLevelCache::with_backends(
        Arc::new(config),
        Arc::new(CacheMonitor::new(dir.path().join("metrics"))),
        vec![
            Box::new(Shared(memory.clone())),
            Box::new(DiskCacheBackend::new(dir.path().join("disk"), 4 * 1024 * 1024).unwrap()),
        ],
    );

    cache.set("k", &1u8, Some(Duration::from_secs(30)), Some(&[CacheLevel::Disk]));
    assert_eq!(cache.get::<u8>("k", None), Some(1));

    let remaining = memory.ttl("k").unwrap().expect("promoted entry has a ttl");
    assert!(remaining <= Duration::from_secs(30));
}

#[test]
fn test_automatic_tier_selection_by_size() {
    let dir = TempDir::new().unwrap();
    let cache = three_tier_cache(&dir, 16, 64);

    // Serialized `"x"` is 3 bytes.
    assert_eq!(
        cache.set("small", &"x", None, None),
        vec![CacheLevel::Memory, CacheLevel::Disk]
    );
    let medium = "m".repeat(30);
    assert_eq!(
        cache.set("medium", &medium, None, None),
        vec![CacheLevel::Disk, CacheLevel::Object]
    );
    let large = "l".repeat(100);
    assert_eq!(
        cache.set("large", &large, None, None),
        vec![CacheLevel::Object]
    );

    assert_eq!(cache.get::<String>("large", Some(&[CacheLevel::Memory])), None);
    assert_eq!(cache.get::<String>("large", None), Some(large));
}

#[test]
fn test_default_thresholds() {
    let dir = TempDir::new().unwrap();
    let cache = three_tier_cache(&dir, 1024 * 1024, 100 * 1024 * 1024);

    assert!(cache.levels_for_size(1024).contains(&CacheLevel::Memory));
    assert!(cache
        .levels_for_size(1024 * 1024 - 1)
        .contains(&CacheLevel::Memory));
    assert!(!cache.levels_for_size(2 * 1024 * 1024).contains(&CacheLevel::Memory));
    assert_eq!(
        cache.levels_for_size(100 * 1024 * 1024 + 1),
        vec![CacheLevel::Object]
    );
    assert_eq!(
        cache.determine_cache_levels(&"tiny"),
        vec![CacheLevel::Memory, CacheLevel::Disk]
    );
}

#[test]
fn test_expired_value_is_a_miss() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(dir.path());

    cache.set("k", &1u8, Some(Duration::ZERO), None);
    assert_eq!(cache.get::<u8>("k", None), None);
    assert_eq!(cache.monitor().metrics(CacheLevel::Memory).misses, 1);
    assert_eq!(cache.monitor().metrics(CacheLevel::Disk).misses, 1);
}

#[test]
fn test_failing_tier_degrades_to_miss() {
    init_test_tracing();
    let config = Arc::new(CacheConfig::default().without_disk_cache());
    let monitor = Arc::new(CacheMonitor::new("unused"));
    let cache = MultiLevelCache::with_backends(
        config,
        monitor.clone(),
        vec![
            Box::new(MemoryCacheBackend::new(8, Duration::from_secs(60))),
            Box::new(FailingBackend::new(CacheLevel::Redis)),
        ],
    );

    let written = cache.set("k", &"v", None, None);
    assert_eq!(written, vec![CacheLevel::Memory]);
    assert_eq!(monitor.metrics(CacheLevel::Redis).errors.get("timeout"), Some(&1));

    assert_eq!(cache.get::<String>("k", None), Some("v".to_string()));
    assert_eq!(cache.get::<String>("k", Some(&[CacheLevel::Redis])), None);
    let redis = monitor.metrics(CacheLevel::Redis);
    assert_eq!(redis.errors.get("timeout"), Some(&2));
    assert_eq!(redis.misses, 1);

    assert!(cache.delete("k", None));
    assert_eq!(monitor.metrics(CacheLevel::Redis).errors.get("timeout"), Some(&3));
}

#[test]
fn test_failing_fast_tier_still_reaches_slow_tier() {
    let dir = TempDir::new().unwrap();
    let config = Arc::new(CacheConfig::default());
    let monitor = Arc::new(CacheMonitor::new(dir.path()));
    let object = ObjectStorageBackend::open_local(&S3Config::new("b", dir.path())).unwrap();
    object.set("k", b"42", None).unwrap();

    let cache = MultiLevelCache::with_backends(
        config,
        monitor.clone(),
        vec![
            Box::new(FailingBackend::new(CacheLevel::Disk)),
            Box::new(object),
        ],
    );

    assert_eq!(cache.get::<u32>("k", None), Some(42));
    // One failed lookup and one failed promotion.
    assert_eq!(monitor.metrics(CacheLevel::Disk).errors.get("timeout"), Some(&2));
    assert_eq!(monitor.metrics(CacheLevel::Object).hits, 1);
}

#[test]
fn test_unreachable_redis_fails_construction() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig::default()
        .with_disk_cache(dir.path().join("disk"), 4 * 1024 * 1024)
        .with_redis("127.0.0.1", 1, 0);
    let err = MultiLevelCache::new(
        Arc::new(config),
        Arc::new(CacheMonitor::new(dir.path().join("metrics"))),
    )
    .unwrap_err();
    assert_eq!(err.kind(), "connection");
}

#[test]
fn test_object_storage_without_config_fails_construction() {
    let mut config = CacheConfig::default().without_disk_cache();
    config.use_object_storage = true;
    let err = MultiLevelCache::new(Arc::new(config), Arc::new(CacheMonitor::new("unused")))
        .unwrap_err();
    assert_eq!(err.kind(), "connection");
}

#[test]
fn test_clear_and_size_gauge() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(dir.path());
    cache.set("a", &"alpha", None, None);
    cache.set("b", &"beta", None, None);
    assert!(cache.monitor().metrics(CacheLevel::Memory).size_bytes > 0);

    assert_eq!(cache.clear(None), 4);
    assert_eq!(cache.monitor().metrics(CacheLevel::Memory).size_bytes, 0);
    assert_eq!(cache.get::<String>("a", None), None);
}

#[test]
fn test_memory_eviction_is_recorded() {
    let config = Arc::new(CacheConfig::default().without_disk_cache());
    let monitor = Arc::new(CacheMonitor::new("unused"));
    let cache = MultiLevelCache::with_backends(
        config,
        monitor.clone(),
        vec![Box::new(MemoryCacheBackend::new(2, Duration::from_secs(60)))],
    );
    for i in 0..5u32 {
        cache.set(&format!("k{}", i), &i, None, None);
    }
    assert_eq!(monitor.metrics(CacheLevel::Memory).evictions, 3);
    let metrics = monitor.metrics(CacheLevel::Memory);
    assert_eq!(metrics.latency["set"].count, 5);
}

mod size_policy {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_levels_follow_size_policy(size in 0usize..512) {
            let dir = TempDir::new().unwrap();
            let cache = three_tier_cache(&dir, 64, 256);
            let levels = cache.levels_for_size(size);

            prop_assert!(!levels.is_empty());
            prop_assert!(levels.windows(2).all(|w| w[0] < w[1]));
            prop_assert_eq!(levels.contains(&CacheLevel::Memory), size < 64);
            prop_assert_eq!(levels.contains(&CacheLevel::Disk), size <= 256);
            prop_assert_eq!(levels.contains(&CacheLevel::Object), size >= 64);
        }
    }
}
