//! LMDB-backed disk tier.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! key-value store under `disk_cache_path`.
//!
//! # Layout
//!
//! Values are stored in the [`CacheEntry`] envelope so expiry survives
//! process restarts. Expired entries are removed lazily on read and
//! eagerly when space is needed.
//!
//! # Capacity
//!
//! The LMDB map size is `disk_cache_size` rounded up to 64 KiB. Live data is
//! kept below three quarters of the map (LMDB needs free pages for
//! copy-on-write); when a write would pass that budget, expired entries are
//! purged and then the oldest entries by store time are evicted.
//!
//! # Thread Safety
//!
//! LMDB allows a single writer; writes are serialised on the internal state
//! lock, which also guards the size accounting.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use tore_core::{CacheError, CacheLevel, CacheResult};

use super::entry::{decode_header, now_ms, CacheEntry};
use super::traits::{CacheBackend, CacheStats};

/// LMDB's compiled-in maximum key size.
pub const MAX_KEY_LEN: usize = 511;

const MAP_ALIGN: u64 = 64 * 1024;

/// Error type for LMDB environment operations.
#[derive(Debug, thiserror::Error)]
pub enum DiskCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DiskCacheError> for CacheError {
    fn from(e: DiskCacheError) -> Self {
        match e {
            DiskCacheError::Io(io) => CacheError::io(CacheLevel::Disk, &io),
            DiskCacheError::EnvOpen(reason) | DiskCacheError::DbOpen(reason) => {
                CacheError::Connection {
                    level: CacheLevel::Disk,
                    reason,
                }
            }
            DiskCacheError::Transaction(reason) => CacheError::backend(CacheLevel::Disk, reason),
        }
    }
}

fn txn_err(e: heed::Error) -> CacheError {
    DiskCacheError::Transaction(e.to_string()).into()
}

#[derive(Debug, Default)]
struct DiskState {
    size_bytes: u64,
    stats: CacheStats,
}

/// Scan record used when making room.
struct StoredRecord {
    key: String,
    stored_at_ms: i64,
    expired: bool,
    size: u64,
}

fn record_size(key: &str, value_len: usize) -> u64 {
    (key.len() + value_len) as u64
}

/// LMDB-backed cache tier.
///
/// # Example
///
/// ```ignore
/// use tore_cache::cache::{CacheBackend, DiskCacheBackend};
///
/// let backend = DiskCacheBackend::new("/tmp/tore-cache", 64 * 1024 * 1024)?;
/// backend.set("page:doc1:1", b"...", None)?;
/// let cached = backend.get("page:doc1:1")?;
/// ```
pub struct DiskCacheBackend {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Str, Bytes>,
    /// Bytes of live data allowed before evicting.
    budget_bytes: u64,
    state: Mutex<DiskState>,
}

impl DiskCacheBackend {
    /// Create a new LMDB cache backend.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_bytes` - Capacity of the tier
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_bytes: u64) -> Result<Self, DiskCacheError> {
        std::fs::create_dir_all(&path)?;

        let map_size = max_size_bytes.max(MAP_ALIGN).div_ceil(MAP_ALIGN) * MAP_ALIGN;

        // SAFETY: the environment is opened once per backend and the files
        // are not modified by anything outside LMDB.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size as usize)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| DiskCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| DiskCacheError::Transaction(e.to_string()))?;

        let db: Database<Str, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| DiskCacheError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| DiskCacheError::Transaction(e.to_string()))?;

        let backend = Self {
            env,
            db,
            budget_bytes: map_size / 4 * 3,
            state: Mutex::new(DiskState::default()),
        };
        backend.recount()?;
        Ok(backend)
    }

    /// Bytes of live data the tier holds before evicting.
    pub fn budget_bytes(&self) -> u64 {
        self.budget_bytes
    }

    /// Rebuild size accounting from the entries already on disk.
    fn recount(&self) -> Result<(), DiskCacheError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| DiskCacheError::Transaction(e.to_string()))?;
        let iter = self
            .db
            .iter(&rtxn)
            .map_err(|e| DiskCacheError::Transaction(e.to_string()))?;

        let mut size_bytes = 0;
        let mut entries = 0;
        for (key, value) in iter.flatten() {
            size_bytes += record_size(key, value.len());
            entries += 1;
        }

        if let Ok(mut state) = self.state.lock() {
            state.size_bytes = size_bytes;
            state.stats.entry_count = entries;
            state.stats.memory_bytes = size_bytes;
        }
        Ok(())
    }

    fn lock(&self) -> CacheResult<MutexGuard<'_, DiskState>> {
        self.state.lock().map_err(|_| CacheError::LockPoisoned {
            level: CacheLevel::Disk,
        })
    }

    fn check_key(key: &str) -> CacheResult<()> {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(CacheError::KeyTooLong {
                level: CacheLevel::Disk,
                len: key.len(),
                max: MAX_KEY_LEN,
            });
        }
        Ok(())
    }

    fn read_raw(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let value = self.db.get(&rtxn, key).map_err(txn_err)?;
        Ok(value.map(|bytes| bytes.to_vec()))
    }

    /// Delete `key`, updating accounting. Returns the removed record size.
    fn remove_locked(&self, state: &mut DiskState, key: &str) -> CacheResult<Option<u64>> {
        let existing = self.read_raw(key)?;
        let Some(existing) = existing else {
            return Ok(None);
        };

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db.delete(&mut wtxn, key).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        let size = record_size(key, existing.len());
        state.size_bytes = state.size_bytes.saturating_sub(size);
        state.stats.entry_count = state.stats.entry_count.saturating_sub(1);
        state.stats.memory_bytes = state.size_bytes;
        Ok(Some(size))
    }

    fn scan(&self) -> CacheResult<Vec<StoredRecord>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let iter = self.db.iter(&rtxn).map_err(txn_err)?;
        let now = now_ms();

        let mut records = Vec::new();
        for (key, value) in iter.flatten() {
            // Entries with an unreadable header are treated as oldest.
            let (stored_at_ms, expires_at_ms) =
                decode_header(CacheLevel::Disk, value).unwrap_or((i64::MIN, None));
            records.push(StoredRecord {
                key: key.to_string(),
                stored_at_ms,
                expired: expires_at_ms.is_some_and(|at| at <= now),
                size: record_size(key, value.len()),
            });
        }
        Ok(records)
    }

    /// Purge expired entries, then evict oldest entries until `incoming`
    /// more bytes fit in the budget. Returns the number of evictions.
    fn make_room(&self, state: &mut DiskState, incoming: u64, skip: &str) -> CacheResult<u64> {
        let mut records = self.scan()?;
        records.retain(|r| r.key != skip);
        records.sort_by_key(|r| (!r.expired, r.stored_at_ms));

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut evicted = 0;
        for record in records {
            let fits = state.size_bytes + incoming <= self.budget_bytes;
            if fits && !record.expired {
                break;
            }
            if self.db.delete(&mut wtxn, &record.key).map_err(txn_err)? {
                state.size_bytes = state.size_bytes.saturating_sub(record.size);
                state.stats.entry_count = state.stats.entry_count.saturating_sub(1);
                if !record.expired {
                    evicted += 1;
                }
            }
        }
        wtxn.commit().map_err(txn_err)?;

        state.stats.memory_bytes = state.size_bytes;
        state.stats.evictions += evicted;
        Ok(evicted)
    }
}

impl CacheBackend for DiskCacheBackend {
    fn level(&self) -> CacheLevel {
        CacheLevel::Disk
    }

    fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        Self::check_key(key)?;
        let mut state = self.lock()?;

        match self.read_raw(key)? {
            Some(bytes) => {
                let entry = CacheEntry::decode(CacheLevel::Disk, &bytes)?;
                if entry.is_expired() {
                    self.remove_locked(&mut state, key)?;
                    state.stats.misses += 1;
                    return Ok(None);
                }
                state.stats.hits += 1;
                Ok(Some(entry.payload))
            }
            None => {
                state.stats.misses += 1;
                Ok(None)
            }
        }
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<u64> {
        Self::check_key(key)?;
        let encoded = CacheEntry::new(value, ttl).encode();
        let incoming = record_size(key, encoded.len());
        if incoming > self.budget_bytes {
            return Err(CacheError::backend(
                CacheLevel::Disk,
                format!(
                    "value of {} bytes exceeds disk tier budget of {} bytes",
                    incoming, self.budget_bytes
                ),
            ));
        }

        let mut state = self.lock()?;
        let previous = self.remove_locked(&mut state, key)?;

        let evicted = if state.size_bytes + incoming > self.budget_bytes {
            self.make_room(&mut state, incoming, key)?
        } else {
            0
        };

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db
            .put(&mut wtxn, key, encoded.as_slice())
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        state.size_bytes += incoming;
        state.stats.entry_count += 1;
        state.stats.memory_bytes = state.size_bytes;
        if previous.is_some() {
            tracing::trace!(key, "disk tier entry overwritten");
        }
        Ok(evicted)
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        Self::check_key(key)?;
        let mut state = self.lock()?;
        let live = match self.read_raw(key)? {
            Some(bytes) => !CacheEntry::decode(CacheLevel::Disk, &bytes)?.is_expired(),
            None => return Ok(false),
        };
        self.remove_locked(&mut state, key)?;
        Ok(live)
    }

    fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        Self::check_key(key)?;
        match self.read_raw(key)? {
            Some(bytes) => {
                let entry = CacheEntry::decode(CacheLevel::Disk, &bytes)?;
                if entry.is_expired() {
                    Ok(None)
                } else {
                    Ok(entry.remaining())
                }
            }
            None => Ok(None),
        }
    }

    fn clear(&self) -> CacheResult<u64> {
        let mut state = self.lock()?;
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let removed = self.db.len(&wtxn).map_err(txn_err)?;
        self.db.clear(&mut wtxn).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        state.size_bytes = 0;
        state.stats.entry_count = 0;
        state.stats.memory_bytes = 0;
        Ok(removed)
    }

    fn stats(&self) -> CacheStats {
        self.state
            .lock()
            .map(|s| s.stats.clone())
            .unwrap_or_default()
    }
}
