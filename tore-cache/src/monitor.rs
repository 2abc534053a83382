//! Cache metrics collection and persistence.
//!
//! [`CacheMonitor`] keeps per-tier counters for hits, misses, size,
//! evictions, errors by type and latency by operation. Counters live for the
//! lifetime of the monitor; snapshots are written as JSON files named
//! `cache_metrics_<YYYYMMDD_HHMMSS>.json` under the metrics directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tore_core::{CacheConfig, CacheLevel, MetricsError, Timestamp, ToreResult};

/// Latency bucket upper bounds (milliseconds).
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s
pub const LATENCY_BUCKETS_MS: &[f64] = &[
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

const SNAPSHOT_PREFIX: &str = "cache_metrics_";
const SNAPSHOT_SUFFIX: &str = ".json";
const SNAPSHOT_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Latency distribution for one operation on one tier.
///
/// `buckets[i]` counts observations `<= LATENCY_BUCKETS_MS[i]`
/// (non-cumulative); the final slot counts everything slower.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyHistogram {
    pub count: u64,
    pub total_ms: f64,
    pub max_ms: f64,
    pub buckets: Vec<u64>,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self {
            count: 0,
            total_ms: 0.0,
            max_ms: 0.0,
            buckets: vec![0; LATENCY_BUCKETS_MS.len() + 1],
        }
    }
}

impl LatencyHistogram {
    pub fn observe(&mut self, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        self.count += 1;
        self.total_ms += ms;
        self.max_ms = self.max_ms.max(ms);
        let slot = LATENCY_BUCKETS_MS
            .iter()
            .position(|bound| ms <= *bound)
            .unwrap_or(LATENCY_BUCKETS_MS.len());
        if let Some(bucket) = self.buckets.get_mut(slot) {
            *bucket += 1;
        }
    }

    pub fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        }
    }
}

/// Raw counters for one tier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    /// Last recorded size gauge in bytes.
    pub size_bytes: u64,
    pub evictions: u64,
    /// Error counts keyed by error type.
    pub errors: BTreeMap<String, u64>,
    /// Latency keyed by operation (`get`, `set`, `delete`).
    pub latency: BTreeMap<String, LatencyHistogram>,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn error_count(&self) -> u64 {
        self.errors.values().sum()
    }
}

/// Per-tier section of a [`MetricsSummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSummary {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub size_bytes: u64,
    pub evictions: u64,
    pub errors: BTreeMap<String, u64>,
    pub latency: BTreeMap<String, LatencySummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: u64,
    pub avg_ms: f64,
    pub max_ms: f64,
    pub bucket_bounds_ms: Vec<f64>,
    pub bucket_counts: Vec<u64>,
}

impl From<&LatencyHistogram> for LatencySummary {
    fn from(h: &LatencyHistogram) -> Self {
        Self {
            count: h.count,
            avg_ms: h.avg_ms(),
            max_ms: h.max_ms,
            bucket_bounds_ms: LATENCY_BUCKETS_MS.to_vec(),
            bucket_counts: h.buckets.clone(),
        }
    }
}

impl From<&CacheMetrics> for LevelSummary {
    fn from(m: &CacheMetrics) -> Self {
        Self {
            hits: m.hits,
            misses: m.misses,
            hit_rate: m.hit_rate(),
            size_bytes: m.size_bytes,
            evictions: m.evictions,
            errors: m.errors.clone(),
            latency: m
                .latency
                .iter()
                .map(|(op, h)| (op.clone(), LatencySummary::from(h)))
                .collect(),
        }
    }
}

/// Serializable snapshot of every tier's metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub generated_at: Timestamp,
    pub levels: BTreeMap<CacheLevel, LevelSummary>,
    pub total_hits: u64,
    pub total_misses: u64,
    pub overall_hit_rate: f64,
    pub total_size_bytes: u64,
    pub total_evictions: u64,
    pub total_errors: u64,
}

/// Collects cache metrics for all tiers.
///
/// Shared as `Arc<CacheMonitor>`; every method takes `&self`.
#[derive(Debug)]
pub struct CacheMonitor {
    metrics_dir: PathBuf,
    levels: Mutex<BTreeMap<CacheLevel, CacheMetrics>>,
}

impl CacheMonitor {
    pub fn new(metrics_dir: impl Into<PathBuf>) -> Self {
        Self {
            metrics_dir: metrics_dir.into(),
            levels: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.metrics_dir.clone())
    }

    pub fn metrics_dir(&self) -> &Path {
        &self.metrics_dir
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<CacheLevel, CacheMetrics>> {
        // Plain counters: keep recording after a panic elsewhere.
        self.levels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_level<F: FnOnce(&mut CacheMetrics)>(&self, level: CacheLevel, f: F) {
        let mut levels = self.lock();
        f(levels.entry(level).or_default());
    }

    pub fn record_hit(&self, level: CacheLevel) {
        self.with_level(level, |m| m.hits += 1);
    }

    pub fn record_miss(&self, level: CacheLevel) {
        self.with_level(level, |m| m.misses += 1);
    }

    /// Set the size gauge for `level`.
    pub fn record_size(&self, level: CacheLevel, bytes: u64) {
        self.with_level(level, |m| m.size_bytes = bytes);
    }

    pub fn record_latency(&self, level: CacheLevel, operation: &str, elapsed: Duration) {
        self.with_level(level, |m| {
            m.latency
                .entry(operation.to_string())
                .or_default()
                .observe(elapsed)
        });
    }

    pub fn record_eviction(&self, level: CacheLevel, count: u64) {
        if count == 0 {
            return;
        }
        self.with_level(level, |m| m.evictions += count);
    }

    pub fn record_error(&self, level: CacheLevel, error_type: &str) {
        self.with_level(level, |m| {
            *m.errors.entry(error_type.to_string()).or_insert(0) += 1
        });
    }

    /// Hit rate for `level`; 0.0 when nothing has been recorded.
    pub fn get_hit_rate(&self, level: CacheLevel) -> f64 {
        self.lock()
            .get(&level)
            .map(CacheMetrics::hit_rate)
            .unwrap_or(0.0)
    }

    /// Copy of the counters for `level`.
    pub fn metrics(&self, level: CacheLevel) -> CacheMetrics {
        self.lock().get(&level).cloned().unwrap_or_default()
    }

    pub fn get_metrics_summary(&self) -> MetricsSummary {
        let levels = self.lock();
        let summaries: BTreeMap<CacheLevel, LevelSummary> = levels
            .iter()
            .map(|(level, m)| (*level, LevelSummary::from(m)))
            .collect();

        let total_hits = levels.values().map(|m| m.hits).sum::<u64>();
        let total_misses = levels.values().map(|m| m.misses).sum::<u64>();
        let lookups = total_hits + total_misses;

        MetricsSummary {
            generated_at: Utc::now(),
            total_hits,
            total_misses,
            overall_hit_rate: if lookups == 0 {
                0.0
            } else {
                total_hits as f64 / lookups as f64
            },
            total_size_bytes: levels.values().map(|m| m.size_bytes).sum(),
            total_evictions: levels.values().map(|m| m.evictions).sum(),
            total_errors: levels.values().map(CacheMetrics::error_count).sum(),
            levels: summaries,
        }
    }

    /// Write a timestamped snapshot into the metrics directory.
    pub fn save_metrics(&self) -> ToreResult<PathBuf> {
        fs::create_dir_all(&self.metrics_dir).map_err(|e| MetricsError::Io {
            path: self.metrics_dir.clone(),
            reason: e.to_string(),
        })?;
        let name = format!(
            "{}{}{}",
            SNAPSHOT_PREFIX,
            Utc::now().format(SNAPSHOT_TIME_FORMAT),
            SNAPSHOT_SUFFIX
        );
        let path = self.metrics_dir.join(name);
        self.export_metrics(&path)?;
        tracing::info!(path = %path.display(), "Saved cache metrics snapshot");
        Ok(path)
    }

    /// Write the current summary as pretty JSON to `path`.
    pub fn export_metrics(&self, path: &Path) -> ToreResult<()> {
        let summary = self.get_metrics_summary();
        let json = serde_json::to_string_pretty(&summary).map_err(|e| MetricsError::Format {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        fs::write(path, json).map_err(|e| MetricsError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    /// Read a snapshot written by [`save_metrics`](Self::save_metrics).
    pub fn load_metrics(path: &Path) -> ToreResult<MetricsSummary> {
        let bytes = fs::read(path).map_err(|e| MetricsError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let summary = serde_json::from_slice(&bytes).map_err(|e| MetricsError::Format {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(summary)
    }

    /// Delete snapshots whose file name timestamp is older than
    /// `max_age_days`. Returns the number of files removed.
    ///
    /// Files that are not snapshots, or whose names do not parse, are left
    /// alone. A missing metrics directory removes nothing.
    pub fn cleanup_old_metrics(&self, max_age_days: u32) -> ToreResult<usize> {
        let entries = match fs::read_dir(&self.metrics_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(MetricsError::Io {
                    path: self.metrics_dir.clone(),
                    reason: e.to_string(),
                }
                .into())
            }
        };

        let cutoff = Utc::now().naive_utc() - chrono::Duration::days(i64::from(max_age_days));
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(taken_at) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(snapshot_time)
            else {
                continue;
            };
            if taken_at >= cutoff {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "Removed old metrics snapshot");
                    removed += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove metrics snapshot");
                }
            }
        }
        Ok(removed)
    }
}

/// Snapshot file name for a given time.
pub fn snapshot_file_name(at: NaiveDateTime) -> String {
    format!(
        "{}{}{}",
        SNAPSHOT_PREFIX,
        at.format(SNAPSHOT_TIME_FORMAT),
        SNAPSHOT_SUFFIX
    )
}

fn snapshot_time(name: &str) -> Option<NaiveDateTime> {
    let stamp = name
        .strip_prefix(SNAPSHOT_PREFIX)?
        .strip_suffix(SNAPSHOT_SUFFIX)?;
    NaiveDateTime::parse_from_str(stamp, SNAPSHOT_TIME_FORMAT).ok()
}
