//! TORE Core - Data Types
//!
//! Pure data structures shared by the cache and the incremental processor:
//! configuration, the document model, hash sets, change reports and errors.
//! This crate contains no I/O beyond parsing configuration.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

pub mod config;
pub mod document;
pub mod enums;
pub mod error;

pub use config::{CacheConfig, ProcessorConfig, S3Config, ENV_PREFIX};
pub use document::{
    BoundingBox, ChangeReport, Document, DocumentHashSet, Page, PageResult, ProcessingMetadata,
    ProcessingResult, Section,
};
pub use enums::{CacheLevel, ChangeType};
pub use error::{
    CacheError, CacheResult, ConfigError, MetricsError, ProcessingError, ToreError, ToreResult,
};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// SHA-256 content hash.
pub type ContentHash = [u8; 32];

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Hex-encoded SHA-256 of `content`.
pub fn hash_hex(content: &[u8]) -> String {
    hex::encode(compute_content_hash(content))
}

/// Hex-encoded SHA-256 of the canonical JSON encoding of `value`.
///
/// `serde_json` maps are ordered, so equal values always hash equally.
pub fn hash_json<T: Serialize + ?Sized>(value: &T) -> Result<String, CacheError> {
    let bytes = serde_json::to_vec(value).map_err(|e| CacheError::Serialization {
        reason: e.to_string(),
    })?;
    Ok(hash_hex(&bytes))
}

// ============================================================================
// CACHE KEYS
// ============================================================================

/// Cache key layout shared by the processor and external callers.
pub mod keys {
    /// Aggregate processing result of a document.
    pub fn result_key(document_id: &str) -> String {
        format!("result:{}", document_id)
    }

    /// Derived data of one page.
    pub fn page_key(document_id: &str, page_number: u32) -> String {
        format!("page:{}:{}", document_id, page_number)
    }

    /// Last recorded hash set of a document.
    pub fn hashes_key(document_id: &str) -> String {
        format!("hashes:{}", document_id)
    }
}
