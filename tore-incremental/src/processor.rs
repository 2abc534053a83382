//! Incremental document processing.
//!
//! [`IncrementalProcessor`] decides per call whether a document needs full
//! reprocessing, only its changed pages, or nothing at all, and keeps the
//! cache entries for the aggregate result, each page and the last hash set
//! consistent with each other.
//!
//! # Decision
//!
//! 1. No cached result or hash set, `force_full`, or a structural change:
//!    full pipeline.
//! 2. Hash sets identical: the cached result is returned untouched.
//! 3. Otherwise the changed pages are computed against the persisted hash
//!    set; too many of them (see [`ProcessorConfig::exceeds_fallback`])
//!    means full pipeline, anything else is an incremental update of just
//!    those pages.
//!
//! The persisted `hashes:` entry is only written after the aggregate it
//! describes, and every [`PageResult`] carries the hash of the page it was
//! derived from. A cached result whose page hashes disagree with the
//! persisted set is never reused, so a failed run can only cost extra work.

use std::path::Path;
use std::sync::Arc;

use tore_cache::MultiLevelCache;
use tore_core::{
    keys, Document, DocumentHashSet, Page, PageResult, ProcessingError, ProcessingResult,
    ProcessorConfig, ToreError, ToreResult,
};

use crate::change_detector::{hash_page, ChangeDetector};

/// Caller-supplied extraction and processing callbacks.
///
/// Errors from these methods propagate out of the processor unchanged.
/// `Self::Error` must absorb [`ToreError`] so validation and hashing
/// failures can travel through the same channel.
pub trait DocumentPipeline {
    type Error: From<ToreError>;

    /// Load the document model (metadata, structure and every page).
    fn extract_page_info(&mut self, path: &Path) -> Result<Document, Self::Error>;

    /// Load a single page.
    fn extract_page(&mut self, path: &Path, page_number: u32) -> Result<Page, Self::Error>;

    /// Derive the cached data of one page.
    fn process_page(&mut self, page: &Page) -> Result<PageResult, Self::Error>;
}

/// Drives a [`DocumentPipeline`] against the multi-level cache.
pub struct IncrementalProcessor<P: DocumentPipeline> {
    cache: Arc<MultiLevelCache>,
    pipeline: P,
    detector: ChangeDetector,
    config: ProcessorConfig,
}

impl<P: DocumentPipeline> IncrementalProcessor<P> {
    /// # Errors
    ///
    /// Returns [`ToreError::Config`] if `config` fails validation.
    pub fn new(
        cache: Arc<MultiLevelCache>,
        pipeline: P,
        config: ProcessorConfig,
    ) -> ToreResult<Self> {
        config.validate()?;
        Ok(Self {
            cache,
            pipeline,
            detector: ChangeDetector::new(),
            config,
        })
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<MultiLevelCache> {
        &self.cache
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    pub fn detector_mut(&mut self) -> &mut ChangeDetector {
        &mut self.detector
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut P {
        &mut self.pipeline
    }

    /// Process the document at `path`, reusing cached page results where the
    /// content hashes show nothing changed.
    pub fn process_document_incremental(
        &mut self,
        path: &Path,
        force_full: bool,
    ) -> Result<ProcessingResult, P::Error> {
        let document = self.pipeline.extract_page_info(path)?;
        document.validate().map_err(ToreError::from)?;
        let hashes = self.detector.compute_document_hash(&document)?;
        let document_id = document.id.as_str();

        if force_full {
            tracing::info!(document_id, "Full reprocess requested");
            return self.process_full(path, &document, &hashes);
        }

        let cached_result: Option<ProcessingResult> =
            self.cache.get(&keys::result_key(document_id), None);
        let cached_hashes: Option<DocumentHashSet> =
            self.cache.get(&keys::hashes_key(document_id), None);

        let (Some(cached_result), Some(cached_hashes)) = (cached_result, cached_hashes) else {
            tracing::info!(document_id, "No cached result, running full pipeline");
            return self.process_full(path, &document, &hashes);
        };

        if cached_result.pages.len() != document.page_count() {
            tracing::info!(
                document_id,
                cached_pages = cached_result.pages.len(),
                pages = document.page_count(),
                "Cached result does not match page count, running full pipeline"
            );
            return self.process_full(path, &document, &hashes);
        }
        if !result_matches_hashes(&cached_result, &cached_hashes) {
            tracing::warn!(
                document_id,
                "Cached result disagrees with persisted hashes, running full pipeline"
            );
            return self.process_full(path, &document, &hashes);
        }

        let report = self.detector.detect_changes(&cached_hashes, &hashes);
        if report.requires_full() {
            tracing::info!(document_id, "Document structure changed, running full pipeline");
            return self.process_full(path, &document, &hashes);
        }
        if report.is_unchanged() {
            tracing::debug!(document_id, "Document unchanged, returning cached result");
            return Ok(cached_result);
        }

        // The baseline is the hash set the cached result was built from.
        self.detector.record_page_hashes(document_id, &cached_hashes);
        let changed = self.detector.get_changed_pages(document_id, &document.pages);
        let total = document.page_count();

        if self.config.exceeds_fallback(changed.len(), total) {
            tracing::info!(
                document_id,
                changed = changed.len(),
                total,
                ratio = self.config.full_reprocess_ratio,
                "Too many pages changed, running full pipeline"
            );
            return self.process_full(path, &document, &hashes);
        }

        tracing::info!(
            document_id,
            changed = ?changed,
            metadata_changed = report.metadata_changed,
            "Incremental update"
        );
        self.process_incremental(path, &document, &hashes, cached_result, changed)
    }

    fn extract_and_process(
        &mut self,
        path: &Path,
        document_id: &str,
        page_number: u32,
    ) -> Result<PageResult, P::Error> {
        let page = self.pipeline.extract_page(path, page_number)?;
        if page.page_number != page_number {
            return Err(ToreError::from(ProcessingError::PageMismatch {
                document_id: document_id.to_string(),
                expected: page_number,
                got: page.page_number,
            })
            .into());
        }
        let mut result = self.pipeline.process_page(&page)?;
        result.page_hash = hash_page(&page);
        self.cache.set(
            &keys::page_key(document_id, page_number),
            &result,
            self.config.result_ttl,
            None,
        );
        Ok(result)
    }

    fn process_full(
        &mut self,
        path: &Path,
        document: &Document,
        hashes: &DocumentHashSet,
    ) -> Result<ProcessingResult, P::Error> {
        let page_numbers: Vec<u32> = document.pages.iter().map(|p| p.page_number).collect();
        let mut pages = Vec::with_capacity(page_numbers.len());
        for &page_number in &page_numbers {
            pages.push(self.extract_and_process(path, &document.id, page_number)?);
        }

        let result = ProcessingResult::new(document.id.clone(), pages, false, page_numbers);
        if self.store(&result, hashes) {
            self.detector.record_page_hashes(&document.id, hashes);
        }
        Ok(result)
    }

    fn process_incremental(
        &mut self,
        path: &Path,
        document: &Document,
        hashes: &DocumentHashSet,
        cached: ProcessingResult,
        changed: Vec<u32>,
    ) -> Result<ProcessingResult, P::Error> {
        let mut pages = cached.pages;
        for &page_number in &changed {
            let result = self.extract_and_process(path, &document.id, page_number)?;
            if let Some(slot) = pages.get_mut(page_number as usize - 1) {
                *slot = result;
            }
        }

        let result = ProcessingResult::new(document.id.clone(), pages, true, changed);
        if self.store(&result, hashes) {
            self.detector.record_page_hashes(&document.id, hashes);
        }
        Ok(result)
    }

    /// Write the aggregate, then the hash set it was computed from.
    ///
    /// If no tier accepts the aggregate the old hash set is dropped instead,
    /// so the next call cannot pair it with a stale result.
    fn store(&self, result: &ProcessingResult, hashes: &DocumentHashSet) -> bool {
        let ttl = self.config.result_ttl;
        let document_id = result.document_id.as_str();
        let hashes_key = keys::hashes_key(document_id);

        let written = self
            .cache
            .set(&keys::result_key(document_id), result, ttl, None);
        if written.is_empty() {
            tracing::warn!(document_id, "No cache tier accepted the result");
            self.cache.delete(&hashes_key, None);
            return false;
        }
        !self.cache.set(&hashes_key, hashes, ttl, None).is_empty()
    }

    /// Cached aggregate result for `document_id`, if any.
    pub fn get_cached_result(&self, document_id: &str) -> Option<ProcessingResult> {
        self.cache.get(&keys::result_key(document_id), None)
    }

    /// Drop every cache entry and baseline held for `document_id`.
    ///
    /// Returns whether an aggregate result was cached.
    pub fn invalidate_document(&mut self, document_id: &str) -> bool {
        let cached = self.get_cached_result(document_id);
        if let Some(result) = &cached {
            for page in &result.pages {
                self.cache
                    .delete(&keys::page_key(document_id, page.page_number), None);
            }
        }
        let removed = self.cache.delete(&keys::result_key(document_id), None);
        self.cache.delete(&keys::hashes_key(document_id), None);
        self.detector.forget(document_id);
        tracing::info!(document_id, "Invalidated cached document");
        removed || cached.is_some()
    }
}

/// Whether every cached page result was derived from the page hash in
/// `hashes` at the same position.
fn result_matches_hashes(result: &ProcessingResult, hashes: &DocumentHashSet) -> bool {
    result.pages.len() == hashes.page_hashes.len()
        && result
            .pages
            .iter()
            .zip(&hashes.page_hashes)
            .all(|(page, hash)| page.page_hash == *hash)
}
