//! Stored entry envelope for tiers without native expiry.
//!
//! The disk and object tiers store values as
//! `[stored_at ms: i64 LE][expires_at ms: i64 LE, 0 = never][payload]`.

use std::time::Duration;

use chrono::Utc;
use tore_core::{CacheError, CacheLevel, CacheResult};

const HEADER_LEN: usize = 16;

/// A decoded entry with its timing header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub stored_at_ms: i64,
    /// `None` when the entry never expires.
    pub expires_at_ms: Option<i64>,
    pub payload: Vec<u8>,
}

impl CacheEntry {
    /// Create an entry stored now with an optional TTL.
    pub fn new(payload: &[u8], ttl: Option<Duration>) -> Self {
        let now = now_ms();
        Self {
            stored_at_ms: now,
            expires_at_ms: ttl.map(|ttl| now.saturating_add(ttl.as_millis() as i64)),
            payload: payload.to_vec(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.payload.len());
        bytes.extend_from_slice(&self.stored_at_ms.to_le_bytes());
        bytes.extend_from_slice(&self.expires_at_ms.unwrap_or(0).to_le_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    pub fn decode(level: CacheLevel, bytes: &[u8]) -> CacheResult<Self> {
        let (stored_at_ms, expires_at_ms) = decode_header(level, bytes)?;
        Ok(Self {
            stored_at_ms,
            expires_at_ms,
            payload: bytes[HEADER_LEN..].to_vec(),
        })
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at_ms.is_some_and(|at| at <= now_ms())
    }

    /// Remaining TTL, `None` if the entry never expires.
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at_ms
            .map(|at| Duration::from_millis(at.saturating_sub(now_ms()).max(0) as u64))
    }
}

/// Decode only the timing header, without copying the payload.
pub fn decode_header(level: CacheLevel, bytes: &[u8]) -> CacheResult<(i64, Option<i64>)> {
    if bytes.len() < HEADER_LEN {
        return Err(CacheError::backend(level, "truncated cache entry header"));
    }
    let mut stored = [0u8; 8];
    stored.copy_from_slice(&bytes[0..8]);
    let mut expires = [0u8; 8];
    expires.copy_from_slice(&bytes[8..16]);
    let expires_at_ms = i64::from_le_bytes(expires);
    Ok((
        i64::from_le_bytes(stored),
        (expires_at_ms != 0).then_some(expires_at_ms),
    ))
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_without_ttl_never_expires() {
        let entry = CacheEntry::new(b"payload", None);
        let decoded = CacheEntry::decode(CacheLevel::Disk, &entry.encode()).unwrap();
        assert_eq!(decoded, entry);
        assert!(!decoded.is_expired());
        assert!(decoded.remaining().is_none());
    }

    #[test]
    fn test_entry_with_elapsed_ttl_is_expired() {
        let mut entry = CacheEntry::new(b"payload", Some(Duration::from_secs(60)));
        assert!(!entry.is_expired());
        assert!(entry.remaining().unwrap() <= Duration::from_secs(60));

        entry.expires_at_ms = Some(now_ms() - 1);
        assert!(entry.is_expired());
        assert_eq!(entry.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_truncated_header_is_backend_error() {
        let err = CacheEntry::decode(CacheLevel::Object, &[1, 2, 3]).unwrap_err();
        assert_eq!(err.kind(), "backend");
    }
}
