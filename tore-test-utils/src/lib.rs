//! TORE Test Utilities
//!
//! Centralized test infrastructure for the TORE workspace:
//! - Proptest generators for the document model
//! - A scripted document pipeline and a fault-injecting cache tier
//! - Test fixtures for common scenarios
//! - Tracing initialisation for tests

// Re-export core types for convenience
pub use tore_core::{
    keys, BoundingBox, CacheConfig, CacheError, CacheLevel, ChangeReport, ChangeType, Document,
    DocumentHashSet, Page, PageResult, ProcessingError, ProcessingResult, ProcessorConfig,
    Section, ToreError, ToreResult,
};

pub use tore_cache::{CacheBackend, CacheMonitor, CacheStats, MultiLevelCache};

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Once;
use std::time::Duration;

use tore_core::CacheResult;
use tore_incremental::{hash_page, DocumentPipeline};

// ============================================================================
// TRACING
// ============================================================================

static TRACING: Once = Once::new();

/// Install a fmt subscriber honouring `RUST_LOG` (default `warn`).
///
/// Safe to call from every test; only the first call has an effect.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// MOCK PIPELINE
// ============================================================================

/// Error type of [`MockPipeline`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MockPipelineError {
    #[error(transparent)]
    Tore(#[from] ToreError),

    #[error("pipeline callback failed: {0}")]
    Callback(String),
}

/// Scripted pipeline serving an in-memory [`Document`].
///
/// Records every callback so tests can assert exactly which pages were
/// extracted and processed. Mutate the served document through
/// [`document_mut`](Self::document_mut) between calls.
#[derive(Debug, Clone)]
pub struct MockPipeline {
    document: Document,
    fail_on_page: Option<u32>,
    fail_extract_info: bool,
    pub extract_info_calls: usize,
    pub extracted_pages: Vec<u32>,
    pub processed_pages: Vec<u32>,
}

impl MockPipeline {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            fail_on_page: None,
            fail_extract_info: false,
            extract_info_calls: 0,
            extracted_pages: Vec::new(),
            processed_pages: Vec::new(),
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    /// Make `process_page` fail for `page_number`.
    pub fn fail_processing_on(&mut self, page_number: Option<u32>) {
        self.fail_on_page = page_number;
    }

    pub fn fail_extract_info(&mut self, fail: bool) {
        self.fail_extract_info = fail;
    }

    pub fn reset_counters(&mut self) {
        self.extract_info_calls = 0;
        self.extracted_pages.clear();
        self.processed_pages.clear();
    }
}

/// Derived data the mock produces for a page.
pub fn mock_page_data(page: &Page) -> serde_json::Value {
    serde_json::json!({
        "upper": page.text.to_uppercase(),
        "chars": page.text.chars().count(),
        "elements": page.elements.len(),
    })
}

impl DocumentPipeline for MockPipeline {
    type Error = MockPipelineError;

    fn extract_page_info(&mut self, path: &Path) -> Result<Document, Self::Error> {
        self.extract_info_calls += 1;
        if self.fail_extract_info {
            return Err(MockPipelineError::Callback(format!(
                "cannot open {}",
                path.display()
            )));
        }
        let mut document = self.document.clone();
        document.path = path.to_path_buf();
        Ok(document)
    }

    fn extract_page(&mut self, _path: &Path, page_number: u32) -> Result<Page, Self::Error> {
        self.extracted_pages.push(page_number);
        self.document
            .page(page_number)
            .cloned()
            .ok_or_else(|| MockPipelineError::Callback(format!("no page {}", page_number)))
    }

    fn process_page(&mut self, page: &Page) -> Result<PageResult, Self::Error> {
        self.processed_pages.push(page.page_number);
        if self.fail_on_page == Some(page.page_number) {
            return Err(MockPipelineError::Callback(format!(
                "processing page {} failed",
                page.page_number
            )));
        }
        Ok(PageResult::new(
            page.page_number,
            hash_page(page),
            mock_page_data(page),
        ))
    }
}

// ============================================================================
// FAULT INJECTION
// ============================================================================

/// Cache tier whose every operation fails with a fixed error.
#[derive(Debug)]
pub struct FailingBackend {
    level: CacheLevel,
    error: CacheError,
    calls: AtomicU64,
}

impl FailingBackend {
    /// A tier at `level` that times out on every call.
    pub fn new(level: CacheLevel) -> Self {
        Self::with_error(
            level,
            CacheError::Timeout {
                level,
                reason: "injected timeout".to_string(),
            },
        )
    }

    pub fn with_error(level: CacheLevel, error: CacheError) -> Self {
        Self {
            level,
            error,
            calls: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn fail<T>(&self) -> CacheResult<T> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Err(self.error.clone())
    }
}

impl CacheBackend for FailingBackend {
    fn level(&self) -> CacheLevel {
        self.level
    }

    fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.fail()
    }

    fn set(&self, _key: &str, _value: &[u8], _ttl: Option<Duration>) -> CacheResult<u64> {
        self.fail()
    }

    fn delete(&self, _key: &str) -> CacheResult<bool> {
        self.fail()
    }

    fn ttl(&self, _key: &str) -> CacheResult<Option<Duration>> {
        self.fail()
    }

    fn clear(&self) -> CacheResult<u64> {
        self.fail()
    }

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for the document model.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_cache_level() -> impl Strategy<Value = CacheLevel> {
        prop_oneof![
            Just(CacheLevel::Memory),
            Just(CacheLevel::Disk),
            Just(CacheLevel::Redis),
            Just(CacheLevel::Object),
        ]
    }

    pub fn arb_bbox() -> impl Strategy<Value = BoundingBox> {
        (0.0f64..100.0, 0.0f64..100.0, 100.0f64..1000.0, 100.0f64..1000.0)
            .prop_map(|(x0, y0, x1, y1)| BoundingBox::new(x0, y0, x1, y1))
    }

    /// A page numbered `page_number` with random text, bbox and elements.
    pub fn arb_page(page_number: u32) -> impl Strategy<Value = Page> {
        (
            "[a-zA-Z0-9 .,]{0,200}",
            arb_bbox(),
            prop::collection::vec("[a-z]{1,8}", 0..4),
        )
            .prop_map(move |(text, bbox, kinds)| {
                let mut page = Page::new(page_number, text).with_bbox(bbox);
                for kind in kinds {
                    page = page.with_element(serde_json::json!({ "type": kind }));
                }
                page
            })
    }

    /// A valid document with `1..=max_pages` pages.
    pub fn arb_document(max_pages: u32) -> impl Strategy<Value = Document> {
        (1..=max_pages.max(1))
            .prop_flat_map(|n| {
                let pages: Vec<_> = (1..=n).map(arb_page).collect();
                ("[a-z]{1,12}", pages)
            })
            .prop_map(|(id, pages)| Document::new(id.clone(), format!("/nonexistent/{}.pdf", id), pages))
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use std::sync::Arc;
    use tore_cache::MemoryCacheBackend;

    /// A document with `pages` pages of distinct text.
    pub fn document_with_pages(id: &str, pages: u32) -> Document {
        let pages = (1..=pages)
            .map(|n| {
                Page::new(n, format!("{} page {} body text", id, n))
                    .with_bbox(BoundingBox::letter())
                    .with_element(serde_json::json!({ "type": "paragraph", "index": n }))
            })
            .collect();
        let mut document = Document::new(id, format!("/nonexistent/{}.pdf", id), pages);
        document.structure = serde_json::json!({ "layout": "single-column" });
        document.metadata = serde_json::json!({ "title": id });
        document
    }

    /// The two-page `doc1` document.
    pub fn two_page_document() -> Document {
        document_with_pages("doc1", 2)
    }

    /// Memory and disk tiers rooted under `dir`, metrics in `dir/metrics`.
    pub fn test_cache_config(dir: &Path) -> CacheConfig {
        CacheConfig::default()
            .with_memory_cache(128, Duration::from_secs(300))
            .with_disk_cache(dir.join("disk"), 8 * 1024 * 1024)
            .with_metrics_dir(dir.join("metrics"))
    }

    /// A cache built from [`test_cache_config`].
    pub fn test_cache(dir: &Path) -> Arc<MultiLevelCache> {
        let config = Arc::new(test_cache_config(dir));
        let monitor = Arc::new(CacheMonitor::from_config(&config));
        match MultiLevelCache::new(config, monitor) {
            Ok(cache) => Arc::new(cache),
            Err(e) => panic!("test cache should open: {}", e),
        }
    }

    /// A cache with only a memory tier.
    pub fn memory_cache() -> Arc<MultiLevelCache> {
        let config = Arc::new(CacheConfig::default().without_disk_cache());
        let monitor = Arc::new(CacheMonitor::new("unused-metrics"));
        let memory = MemoryCacheBackend::new(config.memory_cache_size, config.memory_cache_ttl);
        Arc::new(MultiLevelCache::with_backends(
            config,
            monitor,
            vec![Box::new(memory)],
        ))
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for processing results.

    use super::*;

    /// Assert the aggregate is internally consistent with `document`.
    pub fn assert_result_matches(result: &ProcessingResult, document: &Document) {
        assert_eq!(result.document_id, document.id);
        assert_eq!(result.pages.len(), document.page_count());
        assert_eq!(result.metadata.page_count, document.page_count());
        for (page, derived) in document.pages.iter().zip(&result.pages) {
            assert_eq!(derived.page_number, page.page_number);
            assert_eq!(
                derived.page_hash,
                hash_page(page),
                "page {} result is stale",
                page.page_number
            );
        }
    }

    /// Assert the cached `page:` entries agree with the aggregate.
    pub fn assert_pages_cached(cache: &MultiLevelCache, result: &ProcessingResult) {
        for page in &result.pages {
            let cached: Option<PageResult> =
                cache.get(&keys::page_key(&result.document_id, page.page_number), None);
            assert_eq!(cached.as_ref(), Some(page), "page {} cache entry", page.page_number);
        }
    }
}
