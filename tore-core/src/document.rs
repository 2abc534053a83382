//! Document, page, and processing-result types
//!
//! A [`Document`] is the extracted model of one input file. Pages are
//! numbered from 1 and stored in order, which [`Document::validate`]
//! checks, so page `n` always sits at index `n - 1`.

use crate::{ChangeType, ProcessingError, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Page-space bounding box in PDF points.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BoundingBox {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// US Letter page at 72 dpi.
    pub fn letter() -> Self {
        Self::new(0.0, 0.0, 612.0, 792.0)
    }
}

/// A single extracted page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based page number.
    pub page_number: u32,
    pub text: String,
    pub bbox: BoundingBox,
    /// Layout elements (tables, images, diagrams) as extracted.
    #[serde(default)]
    pub elements: Vec<serde_json::Value>,
}

impl Page {
    pub fn new(page_number: u32, text: impl Into<String>) -> Self {
        Self {
            page_number,
            text: text.into(),
            bbox: BoundingBox::letter(),
            elements: Vec::new(),
        }
    }

    pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = bbox;
        self
    }

    pub fn with_element(mut self, element: serde_json::Value) -> Self {
        self.elements.push(element);
        self
    }
}

/// A logical section of a document, addressed by id rather than position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub page_numbers: Vec<u32>,
}

impl Section {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            text: text.into(),
            page_numbers: Vec::new(),
        }
    }
}

/// A document as produced by the extraction step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub path: PathBuf,
    /// Full text content; empty means "derive from pages".
    #[serde(default)]
    pub content: String,
    /// Structural metadata (outline, page layout kind, ...).
    #[serde(default)]
    pub structure: serde_json::Value,
    /// Free-form metadata (title, author, ...).
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub pages: Vec<Page>,
    #[serde(default)]
    pub sections: Vec<Section>,
}

impl Document {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>, pages: Vec<Page>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            content: String::new(),
            structure: serde_json::Value::Null,
            metadata: serde_json::Value::Null,
            pages,
            sections: Vec::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page(&self, page_number: u32) -> Option<&Page> {
        page_number
            .checked_sub(1)
            .and_then(|idx| self.pages.get(idx as usize))
    }

    /// Text used for the content hash: `content`, or joined page text.
    pub fn text_content(&self) -> String {
        if !self.content.is_empty() {
            return self.content.clone();
        }
        self.pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Check the structural guarantees the incremental merge relies on.
    ///
    /// - the id is non-empty
    /// - page numbers are exactly `1..=n` in order
    /// - section ids are unique
    pub fn validate(&self) -> Result<(), ProcessingError> {
        if self.id.trim().is_empty() {
            return Err(ProcessingError::InvalidDocument {
                document_id: self.id.clone(),
                reason: "empty document id".to_string(),
            });
        }
        for (idx, page) in self.pages.iter().enumerate() {
            let expected = idx as u32 + 1;
            if page.page_number != expected {
                return Err(ProcessingError::PageMismatch {
                    document_id: self.id.clone(),
                    expected,
                    got: page.page_number,
                });
            }
        }
        let mut seen = HashSet::new();
        for section in &self.sections {
            if !seen.insert(section.id.as_str()) {
                return Err(ProcessingError::InvalidDocument {
                    document_id: self.id.clone(),
                    reason: format!("duplicate section id {}", section.id),
                });
            }
        }
        Ok(())
    }
}

/// Content hashes of a document, one per concern plus one per page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentHashSet {
    pub file: String,
    pub content: String,
    pub structure: String,
    pub metadata: String,
    pub page_hashes: Vec<String>,
}

/// Outcome of comparing two hash sets of the same document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChangeReport {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    /// 1-based page numbers that differ.
    pub affected_pages: Vec<u32>,
    pub metadata_changed: bool,
    pub structure_changed: bool,
}

impl ChangeReport {
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn is_unchanged(&self) -> bool {
        self.change_type == ChangeType::None
    }

    pub fn requires_full(&self) -> bool {
        self.change_type == ChangeType::Full || self.structure_changed
    }
}

/// Derived data for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub page_number: u32,
    /// Hash of the page this result was derived from.
    pub page_hash: String,
    pub data: serde_json::Value,
}

impl PageResult {
    pub fn new(page_number: u32, page_hash: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            page_number,
            page_hash: page_hash.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    pub page_count: usize,
    pub incremental_update: bool,
    pub changed_pages: Vec<u32>,
    pub processed_at: Timestamp,
}

/// Aggregate result for a whole document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub document_id: String,
    pub pages: Vec<PageResult>,
    pub metadata: ProcessingMetadata,
}

impl ProcessingResult {
    pub fn new(
        document_id: impl Into<String>,
        pages: Vec<PageResult>,
        incremental_update: bool,
        changed_pages: Vec<u32>,
    ) -> Self {
        let page_count = pages.len();
        Self {
            document_id: document_id.into(),
            pages,
            metadata: ProcessingMetadata {
                page_count,
                incremental_update,
                changed_pages,
                processed_at: Utc::now(),
            },
        }
    }

    pub fn page(&self, page_number: u32) -> Option<&PageResult> {
        page_number
            .checked_sub(1)
            .and_then(|idx| self.pages.get(idx as usize))
    }
}
