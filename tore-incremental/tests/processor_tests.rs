//! Incremental processor decisions against a real memory + disk cache.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tore_cache::{
    CacheBackend, CacheMonitor, DiskCacheBackend, MemoryCacheBackend, MultiLevelCache,
};
use tore_core::{
    keys, CacheConfig, CacheLevel, DocumentHashSet, Page, ProcessingError, ProcessingResult,
    ProcessorConfig, ToreError,
};
use tore_incremental::{hash_page, IncrementalProcessor};
use tore_test_utils::assertions::{assert_pages_cached, assert_result_matches};
use tore_test_utils::fixtures::{document_with_pages, memory_cache, test_cache, two_page_document};
use tore_test_utils::{init_test_tracing, FailingBackend, MockPipeline, MockPipelineError};

const DOC: &str = "/docs/doc1.pdf";

fn processor(
    cache: Arc<MultiLevelCache>,
    pages: u32,
) -> IncrementalProcessor<MockPipeline> {
    let document = if pages == 2 {
        two_page_document()
    } else {
        document_with_pages("doc1", pages)
    };
    IncrementalProcessor::new(cache, MockPipeline::new(document), ProcessorConfig::default())
        .unwrap()
}

fn set_count(cache: &MultiLevelCache) -> u64 {
    cache
        .levels()
        .into_iter()
        .map(|level| {
            cache
                .monitor()
                .metrics(level)
                .latency
                .get("set")
                .map_or(0, |h| h.count)
        })
        .sum()
}

#[test]
fn test_doc1_first_full_then_incremental() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();
    let cache = test_cache(dir.path());
    let mut processor = processor(cache.clone(), 2);

    let first = processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();
    assert!(!first.metadata.incremental_update);
    assert_eq!(first.metadata.changed_pages, vec![1, 2]);
    assert_eq!(first.pages.len(), 2);

    processor.pipeline_mut().document_mut().pages[1].text = "second page, revised".to_string();
    processor.pipeline_mut().reset_counters();

    let second = processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();
    assert!(second.metadata.incremental_update);
    assert_eq!(second.metadata.changed_pages, vec![2]);
    assert_eq!(second.pages[0], first.pages[0]);
    assert_ne!(second.pages[1], first.pages[1]);

    assert_eq!(processor.pipeline().extracted_pages, vec![2]);
    assert_eq!(processor.pipeline().processed_pages, vec![2]);

    assert_result_matches(&second, processor.pipeline().document());
    assert_pages_cached(&cache, &second);
    assert_eq!(processor.get_cached_result("doc1"), Some(second));
}

#[test]
fn test_unchanged_document_returns_cached_without_writes() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(dir.path());
    let mut processor = processor(cache.clone(), 4);

    let first = processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();
    processor.pipeline_mut().reset_counters();
    let writes = set_count(&cache);

    let again = processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();
    assert_eq!(again, first);
    assert_eq!(set_count(&cache), writes);
    assert!(processor.pipeline().processed_pages.is_empty());
    assert!(processor.pipeline().extracted_pages.is_empty());
}

#[test]
fn test_single_page_of_ten() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(dir.path());
    let mut processor = processor(cache, 10);
    processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();

    processor.pipeline_mut().document_mut().pages[2].text.push_str(" (edited)");
    let result = processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();
    assert!(result.metadata.incremental_update);
    assert_eq!(result.metadata.changed_pages, vec![3]);
}

#[test]
fn test_exactly_thirty_percent_stays_incremental() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(dir.path());
    let mut processor = processor(cache, 10);
    processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();

    for idx in [0, 4, 8] {
        processor.pipeline_mut().document_mut().pages[idx].text = format!("new {}", idx);
    }
    let result = processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();
    assert!(result.metadata.incremental_update);
    assert_eq!(result.metadata.changed_pages, vec![1, 5, 9]);
}

#[test]
fn test_more_than_thirty_percent_falls_back_to_full() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(dir.path());
    let mut processor = processor(cache.clone(), 10);
    processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();

    for idx in 0..4 {
        processor.pipeline_mut().document_mut().pages[idx].text = format!("rewritten {}", idx);
    }
    processor.pipeline_mut().reset_counters();
    let result = processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();
    assert!(!result.metadata.incremental_update);
    assert_eq!(result.metadata.changed_pages, (1..=10).collect::<Vec<_>>());
    assert_eq!(processor.pipeline().processed_pages.len(), 10);
    assert_result_matches(&result, processor.pipeline().document());
    assert_pages_cached(&cache, &result);
}

#[test]
fn test_force_full_reprocesses_everything() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(dir.path());
    let mut processor = processor(cache, 3);
    processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();
    processor.pipeline_mut().reset_counters();

    let result = processor
        .process_document_incremental(Path::new(DOC), true)
        .unwrap();
    assert!(!result.metadata.incremental_update);
    assert_eq!(processor.pipeline().processed_pages, vec![1, 2, 3]);
}

#[test]
fn test_added_page_is_structural_change() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(dir.path());
    let mut processor = processor(cache, 2);
    processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();

    processor
        .pipeline_mut()
        .document_mut()
        .pages
        .push(Page::new(3, "appendix"));
    let result = processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();
    assert!(!result.metadata.incremental_update);
    assert_eq!(result.pages.len(), 3);
    assert_eq!(result.metadata.page_count, 3);
}

#[test]
fn test_metadata_only_change_rewrites_aggregate() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(dir.path());
    let mut processor = processor(cache, 2);
    let first = processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();

    processor.pipeline_mut().document_mut().metadata = serde_json::json!({"title": "renamed"});
    processor.pipeline_mut().reset_counters();
    let result = processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();
    assert!(result.metadata.incremental_update);
    assert!(result.metadata.changed_pages.is_empty());
    assert_eq!(result.pages, first.pages);
    assert!(processor.pipeline().processed_pages.is_empty());

    // The new hash set was persisted, so the next call is a no-op.
    let again = processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();
    assert_eq!(again, result);
}

#[test]
fn test_persisted_hashes_survive_processor_restart() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(dir.path());
    {
        let mut first = processor(cache.clone(), 2);
        first
            .process_document_incremental(Path::new(DOC), false)
            .unwrap();
    }

    let mut document = two_page_document();
    document.pages[1].text = "edited while closed".to_string();
    let mut restarted = IncrementalProcessor::new(
        cache,
        MockPipeline::new(document),
        ProcessorConfig::default(),
    ).unwrap();
    let result = restarted
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();
    assert!(result.metadata.incremental_update);
    assert_eq!(result.metadata.changed_pages, vec![2]);
}

#[test]
fn test_callback_errors_propagate_unchanged() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(dir.path());
    let mut processor = processor(cache, 3);
    processor.pipeline_mut().fail_processing_on(Some(2));

    let err = processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap_err();
    assert_eq!(
        err,
        MockPipelineError::Callback("processing page 2 failed".to_string())
    );
    assert!(processor.get_cached_result("doc1").is_none());

    processor.pipeline_mut().fail_processing_on(None);
    processor.pipeline_mut().fail_extract_info(true);
    let err = processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap_err();
    assert_eq!(
        err,
        MockPipelineError::Callback(format!("cannot open {}", DOC))
    );
}

#[test]
fn test_invalid_document_is_rejected() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(dir.path());
    let mut processor = processor(cache, 2);
    processor.pipeline_mut().document_mut().pages[1].page_number = 5;

    let err = processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap_err();
    assert_eq!(
        err,
        MockPipelineError::Tore(ToreError::Processing(ProcessingError::PageMismatch {
            document_id: "doc1".to_string(),
            expected: 2,
            got: 5,
        }))
    );
}

#[test]
fn test_invalidate_document_forces_full_run() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(dir.path());
    let mut processor = processor(cache.clone(), 2);
    processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();

    assert!(processor.invalidate_document("doc1"));
    assert!(processor.get_cached_result("doc1").is_none());
    assert!(cache
        .get::<tore_core::PageResult>(&keys::page_key("doc1", 1), None)
        .is_none());
    assert!(!processor.detector().has_baseline("doc1"));
    assert!(!processor.invalidate_document("doc1"));

    let result = processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();
    assert!(!result.metadata.incremental_update);
}

#[test]
fn test_result_ttl_applies_to_cached_entries() {
    let config = Arc::new(CacheConfig::default().without_disk_cache());
    let cache = Arc::new(MultiLevelCache::with_backends(
        config,
        Arc::new(CacheMonitor::new("unused")),
        vec![Box::new(MemoryCacheBackend::new(64, Duration::from_secs(3600)))],
    ));
    let mut processor = IncrementalProcessor::new(
        cache,
        MockPipeline::new(two_page_document()),
        ProcessorConfig::default().with_result_ttl(Duration::ZERO),
    ).unwrap();

    processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();
    // Everything expired immediately, so the next run is full again.
    assert!(processor.get_cached_result("doc1").is_none());
    let result = processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();
    assert!(!result.metadata.incremental_update);
}

#[test]
fn test_processing_continues_when_every_tier_fails() {
    init_test_tracing();
    let config = Arc::new(CacheConfig::default().without_disk_cache());
    let monitor = Arc::new(CacheMonitor::new("unused"));
    let cache = Arc::new(MultiLevelCache::with_backends(
        config,
        monitor.clone(),
        vec![Box::new(FailingBackend::new(CacheLevel::Memory))],
    ));
    let mut processor = IncrementalProcessor::new(
        cache,
        MockPipeline::new(two_page_document()),
        ProcessorConfig::default(),
    ).unwrap();

    for _ in 0..2 {
        let result = processor
            .process_document_incremental(Path::new(DOC), false)
            .unwrap();
        assert!(!result.metadata.incremental_update);
        assert_eq!(result.pages.len(), 2);
    }
    assert!(monitor.metrics(CacheLevel::Memory).error_count() > 0);
}

#[test]
fn test_failed_page_is_reprocessed_on_retry() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();
    let cache = test_cache(dir.path());
    let mut processor = processor(cache.clone(), 10);
    processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();

    processor.pipeline_mut().document_mut().pages[2].text = "page three, revised".to_string();
    processor.pipeline_mut().fail_processing_on(Some(3));
    assert!(processor
        .process_document_incremental(Path::new(DOC), false)
        .is_err());

    processor.pipeline_mut().fail_processing_on(None);
    processor.pipeline_mut().reset_counters();
    let retry = processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();
    assert!(retry.metadata.incremental_update);
    assert_eq!(retry.metadata.changed_pages, vec![3]);
    assert_eq!(processor.pipeline().processed_pages, vec![3]);
    let edited = processor.pipeline().document().pages[2].clone();
    assert_eq!(retry.pages[2].page_hash, hash_page(&edited));
    assert_result_matches(&retry, processor.pipeline().document());
    assert_pages_cached(&cache, &retry);

    let again = processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();
    assert_eq!(again, retry);
}

#[test]
fn test_failed_fallback_run_is_redone_on_retry() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(dir.path());
    let mut processor = processor(cache, 10);
    processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();

    for idx in 0..5 {
        processor.pipeline_mut().document_mut().pages[idx].text = format!("draft {}", idx);
    }
    processor.pipeline_mut().fail_processing_on(Some(7));
    assert!(processor
        .process_document_incremental(Path::new(DOC), false)
        .is_err());

    processor.pipeline_mut().fail_processing_on(None);
    let result = processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();
    assert!(!result.metadata.incremental_update);
    assert_result_matches(&result, processor.pipeline().document());
}

#[test]
fn test_failing_fast_tier_keeps_results_correct() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();
    let config = Arc::new(
        CacheConfig::default().with_disk_cache(dir.path().join("disk"), 4 * 1024 * 1024),
    );
    let monitor = Arc::new(CacheMonitor::new(dir.path().join("metrics")));
    let backends: Vec<Box<dyn CacheBackend>> = vec![
        Box::new(FailingBackend::new(CacheLevel::Memory)),
        Box::new(DiskCacheBackend::new(dir.path().join("disk"), 4 * 1024 * 1024).unwrap()),
    ];
    let cache = Arc::new(MultiLevelCache::with_backends(config, monitor.clone(), backends));
    let mut processor = processor(cache.clone(), 4);

    processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();
    processor.pipeline_mut().document_mut().pages[1].text = "edited".to_string();
    processor.pipeline_mut().fail_processing_on(Some(2));
    assert!(processor
        .process_document_incremental(Path::new(DOC), false)
        .is_err());

    processor.pipeline_mut().fail_processing_on(None);
    let result = processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();
    assert!(result.metadata.incremental_update);
    assert_eq!(result.metadata.changed_pages, vec![2]);
    assert_result_matches(&result, processor.pipeline().document());
    assert_pages_cached(&cache, &result);
    assert!(monitor.metrics(CacheLevel::Memory).error_count() > 0);
}

#[test]
fn test_unstored_result_drops_hash_set() {
    let config = Arc::new(
        CacheConfig::default()
            .without_disk_cache()
            .with_size_thresholds(1000, 1024 * 1024),
    );
    let backends: Vec<Box<dyn CacheBackend>> = vec![
        Box::new(MemoryCacheBackend::new(64, Duration::from_secs(3600))),
        Box::new(FailingBackend::new(CacheLevel::Disk)),
    ];
    let cache = Arc::new(MultiLevelCache::with_backends(
        config,
        Arc::new(CacheMonitor::new("unused")),
        backends,
    ));

    // The aggregate is too large for memory, so only the failing disk tier
    // is asked to hold it. The hash set alone would still fit in memory.
    let mut document = document_with_pages("doc1", 3);
    for page in &mut document.pages {
        page.text = "x".repeat(600);
    }
    let mut processor = IncrementalProcessor::new(
        cache.clone(),
        MockPipeline::new(document),
        ProcessorConfig::default(),
    )
    .unwrap();

    processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();
    assert!(processor.get_cached_result("doc1").is_none());
    assert!(cache
        .get::<DocumentHashSet>(&keys::hashes_key("doc1"), None)
        .is_none());
    assert!(!processor.detector().has_baseline("doc1"));

    processor.pipeline_mut().reset_counters();
    let result = processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();
    assert!(!result.metadata.incremental_update);
    assert_eq!(processor.pipeline().processed_pages, vec![1, 2, 3]);
}

#[test]
fn test_result_disagreeing_with_hashes_is_not_reused() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(dir.path());
    let mut processor = processor(cache.clone(), 3);
    let first = processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();

    let mut tampered: ProcessingResult = first.clone();
    tampered.pages[1].page_hash = "0".repeat(64);
    cache.set(&keys::result_key("doc1"), &tampered, None, None);

    processor.pipeline_mut().reset_counters();
    let result = processor
        .process_document_incremental(Path::new(DOC), false)
        .unwrap();
    assert!(!result.metadata.incremental_update);
    assert_eq!(processor.pipeline().processed_pages, vec![1, 2, 3]);
    assert_eq!(result.pages, first.pages);
}

#[test]
fn test_invalid_processor_config_is_rejected() {
    for ratio in [f64::NAN, 5.0, -0.1] {
        let mut config = ProcessorConfig::default();
        config.full_reprocess_ratio = ratio;
        let err = IncrementalProcessor::new(
            memory_cache(),
            MockPipeline::new(two_page_document()),
            config,
        )
        .err()
        .expect("config should be rejected");
        assert!(matches!(err, ToreError::Config(_)));
    }
}
