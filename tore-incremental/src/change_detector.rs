//! Content-hash change detection.
//!
//! Hashes are hex SHA-256. A document is summarised as a [`DocumentHashSet`]
//! (file bytes, text content, structure, metadata, one hash per page) and two
//! sets are compared with [`ChangeDetector::detect_changes`].
//!
//! The detector also keeps per-document page and section baselines so a
//! caller can ask "what changed since last time" without holding the old
//! hash set itself.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tore_core::{
    hash_hex, hash_json, ChangeReport, ChangeType, Document, DocumentHashSet, Page,
    ProcessingError, Section, ToreResult,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct FileRecord {
    modified: Option<SystemTime>,
    len: u64,
}

/// Tracks file stamps and page/section hash baselines per document.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    files: HashMap<PathBuf, FileRecord>,
    pages: HashMap<String, BTreeMap<u32, String>>,
    sections: HashMap<String, HashMap<String, String>>,
}

/// Hash of one page over its text, bounding box and elements.
pub fn hash_page(page: &Page) -> String {
    let mut buf = Vec::with_capacity(page.text.len() + 64);
    buf.extend_from_slice(page.text.as_bytes());
    buf.push(0);
    for coord in [page.bbox.x0, page.bbox.y0, page.bbox.x1, page.bbox.y1] {
        buf.extend_from_slice(&coord.to_le_bytes());
    }
    // Serializing `Value`s cannot fail.
    buf.extend_from_slice(&serde_json::to_vec(&page.elements).unwrap_or_default());
    hash_hex(&buf)
}

fn hash_section(section: &Section) -> String {
    let mut buf = Vec::with_capacity(section.title.len() + section.text.len() + 16);
    buf.extend_from_slice(section.title.as_bytes());
    buf.push(0);
    buf.extend_from_slice(section.text.as_bytes());
    buf.push(0);
    for page in &section.page_numbers {
        buf.extend_from_slice(&page.to_le_bytes());
    }
    hash_hex(&buf)
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `path` changed (mtime or size) since the previous call.
    ///
    /// The first call for a path reports `true`. A path that cannot be read
    /// reports `true` and loses its record, so it reads as new once it
    /// reappears.
    pub fn has_file_changed(&mut self, path: &Path) -> bool {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "File not readable, treating as changed");
                self.files.remove(path);
                return true;
            }
        };
        let current = FileRecord {
            modified: meta.modified().ok(),
            len: meta.len(),
        };
        match self.files.insert(path.to_path_buf(), current.clone()) {
            Some(previous) => previous != current,
            None => true,
        }
    }

    /// Compute the full hash set of `document`. Deterministic for equal input.
    ///
    /// The file hash covers the bytes at `document.path`; a path that does
    /// not exist hashes as empty input.
    pub fn compute_document_hash(&self, document: &Document) -> ToreResult<DocumentHashSet> {
        let file_bytes = match fs::read(&document.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(ProcessingError::Io {
                    path: document.path.clone(),
                    reason: e.to_string(),
                }
                .into())
            }
        };

        let structure = serde_json::json!({
            "structure": document.structure,
            "page_count": document.page_count(),
        });

        Ok(DocumentHashSet {
            file: hash_hex(&file_bytes),
            content: hash_hex(document.text_content().as_bytes()),
            structure: hash_json(&structure)?,
            metadata: hash_json(&document.metadata)?,
            page_hashes: document.pages.iter().map(hash_page).collect(),
        })
    }

    pub fn hash_page(&self, page: &Page) -> String {
        hash_page(page)
    }

    /// Page numbers whose hash differs from the stored baseline, ascending.
    ///
    /// Without a baseline every page is reported. The baseline is replaced
    /// with `pages` either way.
    pub fn get_changed_pages(&mut self, document_id: &str, pages: &[Page]) -> Vec<u32> {
        let current: BTreeMap<u32, String> =
            pages.iter().map(|p| (p.page_number, hash_page(p))).collect();

        let changed = match self.pages.get(document_id) {
            Some(previous) => current
                .iter()
                .filter(|(page, hash)| previous.get(*page) != Some(*hash))
                .map(|(page, _)| *page)
                .collect(),
            None => current.keys().copied().collect(),
        };

        self.pages.insert(document_id.to_string(), current);
        changed
    }

    /// Section ids whose hash differs from the stored baseline, sorted.
    ///
    /// Same baseline rules as [`get_changed_pages`](Self::get_changed_pages).
    pub fn get_changed_sections(&mut self, document_id: &str, sections: &[Section]) -> Vec<String> {
        let current: HashMap<String, String> = sections
            .iter()
            .map(|s| (s.id.clone(), hash_section(s)))
            .collect();

        let mut changed: Vec<String> = match self.sections.get(document_id) {
            Some(previous) => current
                .iter()
                .filter(|(id, hash)| previous.get(*id) != Some(*hash))
                .map(|(id, _)| id.clone())
                .collect(),
            None => current.keys().cloned().collect(),
        };
        changed.sort();

        self.sections.insert(document_id.to_string(), current);
        changed
    }

    /// Whether a page baseline exists for `document_id`.
    pub fn has_baseline(&self, document_id: &str) -> bool {
        self.pages.contains_key(document_id)
    }

    /// Install `hashes` as the page baseline unless one is already held.
    pub fn seed_page_hashes(&mut self, document_id: &str, hashes: &DocumentHashSet) {
        if !self.has_baseline(document_id) {
            self.record_page_hashes(document_id, hashes);
        }
    }

    /// Replace the page baseline with `hashes`.
    pub fn record_page_hashes(&mut self, document_id: &str, hashes: &DocumentHashSet) {
        let baseline = hashes
            .page_hashes
            .iter()
            .enumerate()
            .map(|(idx, hash)| (idx as u32 + 1, hash.clone()))
            .collect();
        self.pages.insert(document_id.to_string(), baseline);
    }

    /// Drop every baseline held for `document_id`.
    pub fn forget(&mut self, document_id: &str) {
        self.pages.remove(document_id);
        self.sections.remove(document_id);
    }

    /// Classify the difference between two hash sets of one document.
    ///
    /// - identical sets: [`ChangeType::None`]
    /// - different structure (including page count): [`ChangeType::Full`]
    ///   with every page of `new` affected
    /// - otherwise: [`ChangeType::Partial`] with the pages whose hashes
    ///   differ positionally, possibly none when only file bytes or metadata
    ///   changed
    pub fn detect_changes(&self, old: &DocumentHashSet, new: &DocumentHashSet) -> ChangeReport {
        if old == new {
            return ChangeReport::unchanged();
        }

        let metadata_changed = old.metadata != new.metadata;

        if old.structure != new.structure || old.page_hashes.len() != new.page_hashes.len() {
            return ChangeReport {
                change_type: ChangeType::Full,
                affected_pages: (1..=new.page_hashes.len() as u32).collect(),
                metadata_changed,
                structure_changed: true,
            };
        }

        let affected_pages = old
            .page_hashes
            .iter()
            .zip(&new.page_hashes)
            .enumerate()
            .filter(|(_, (a, b))| a != b)
            .map(|(idx, _)| idx as u32 + 1)
            .collect();

        ChangeReport {
            change_type: ChangeType::Partial,
            affected_pages,
            metadata_changed,
            structure_changed: false,
        }
    }
}
