//! Enum types for cache tiers and change classification

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// CACHE LEVELS
// ============================================================================

/// One tier in the multi-level cache priority chain.
///
/// The derived ordering is the lookup priority: faster tiers compare lower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheLevel {
    /// In-process LRU map
    Memory,
    /// Local LMDB environment
    Disk,
    /// Shared Redis keyspace
    Redis,
    /// Object-storage bucket
    Object,
}

impl CacheLevel {
    /// All tiers in lookup priority order.
    pub const ALL: [CacheLevel; 4] = [
        CacheLevel::Memory,
        CacheLevel::Disk,
        CacheLevel::Redis,
        CacheLevel::Object,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheLevel::Memory => "memory",
            CacheLevel::Disk => "disk",
            CacheLevel::Redis => "redis",
            CacheLevel::Object => "object",
        }
    }
}

impl fmt::Display for CacheLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CacheLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(CacheLevel::Memory),
            "disk" => Ok(CacheLevel::Disk),
            "redis" => Ok(CacheLevel::Redis),
            "object" | "s3" | "object_storage" => Ok(CacheLevel::Object),
            _ => Err(format!("Invalid CacheLevel: {}", s)),
        }
    }
}

// ============================================================================
// CHANGE CLASSIFICATION
// ============================================================================

/// Classification of the difference between two document hash sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Nothing changed
    #[default]
    None,
    /// Only specific pages changed
    Partial,
    /// Document structure changed; per-page state is suspect
    Full,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            ChangeType::None => "none",
            ChangeType::Partial => "partial",
            ChangeType::Full => "full",
        };
        write!(f, "{}", value)
    }
}
