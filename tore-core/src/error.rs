//! Error types for TORE cache and processing operations

use crate::CacheLevel;
use std::path::PathBuf;
use thiserror::Error;

/// Cache tier errors.
///
/// These never reach callers of `MultiLevelCache::get`/`set`: the cache
/// counts them per tier and degrades to a miss. Only construction errors
/// (connection, environment open) are surfaced.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Connection to {level} tier failed: {reason}")]
    Connection { level: CacheLevel, reason: String },

    #[error("Operation on {level} tier timed out: {reason}")]
    Timeout { level: CacheLevel, reason: String },

    #[error("Backend error in {level} tier: {reason}")]
    Backend { level: CacheLevel, reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("I/O error in {level} tier: {reason}")]
    Io { level: CacheLevel, reason: String },

    #[error("{level} tier lock poisoned")]
    LockPoisoned { level: CacheLevel },

    #[error("Key too long for {level} tier: {len} bytes (max {max})")]
    KeyTooLong {
        level: CacheLevel,
        len: usize,
        max: usize,
    },
}

impl CacheError {
    /// Short error label used as the error-type dimension in cache metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::Timeout { .. } => "timeout",
            Self::Backend { .. } => "backend",
            Self::Serialization { .. } => "serialization",
            Self::Io { .. } => "io",
            Self::LockPoisoned { .. } => "lock_poisoned",
            Self::KeyTooLong { .. } => "key_too_long",
        }
    }

    pub fn backend(level: CacheLevel, reason: impl Into<String>) -> Self {
        Self::Backend {
            level,
            reason: reason.into(),
        }
    }

    pub fn io(level: CacheLevel, err: &std::io::Error) -> Self {
        Self::Io {
            level,
            reason: err.to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Document processing errors raised by the processor itself.
///
/// Errors from caller-supplied extraction/processing callbacks are not
/// wrapped here; they propagate in the pipeline's own error type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProcessingError {
    #[error("Invalid document {document_id}: {reason}")]
    InvalidDocument { document_id: String, reason: String },

    #[error("Page mismatch for {document_id}: expected page {expected}, got {got}")]
    PageMismatch {
        document_id: String,
        expected: u32,
        got: u32,
    },

    #[error("I/O error on {path:?}: {reason}")]
    Io { path: PathBuf, reason: String },
}

/// Metrics snapshot persistence errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MetricsError {
    #[error("I/O error on metrics snapshot {path:?}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("Invalid metrics snapshot {path:?}: {reason}")]
    Format { path: PathBuf, reason: String },
}

/// Master error type for all TORE errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToreError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),
}

/// Result type alias for TORE operations.
pub type ToreResult<T> = Result<T, ToreError>;

/// Result type alias for a single cache tier operation.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================
