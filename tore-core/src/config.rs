//! Configuration types
//!
//! `CacheConfig` is created once at startup, validated, and then shared
//! read-only (`Arc<CacheConfig>`) by every cache component.

use crate::{CacheLevel, ConfigError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const MIB: usize = 1024 * 1024;

/// Environment variable prefix for [`CacheConfig::from_env`].
pub const ENV_PREFIX: &str = "TORE_CACHE_";

/// Object-storage parameters for the object tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Local directory backing the bucket (mounted volume or emulator root).
    pub root: PathBuf,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl S3Config {
    pub fn new(bucket: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: String::new(),
            region: default_region(),
            root: root.into(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }
}

/// Static configuration of the multi-level cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries in the memory tier.
    pub memory_cache_size: usize,
    /// Default TTL for memory entries written without an explicit TTL.
    #[serde(with = "duration_secs")]
    pub memory_cache_ttl: Duration,
    /// LMDB directory; `None` disables the disk tier.
    pub disk_cache_path: Option<PathBuf>,
    /// Disk tier capacity in bytes.
    pub disk_cache_size: u64,
    pub use_redis: bool,
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_db: i64,
    pub redis_key_prefix: String,
    #[serde(with = "duration_secs")]
    pub redis_timeout: Duration,
    pub use_object_storage: bool,
    pub s3_config: Option<S3Config>,
    /// Values strictly below this size go to memory, disk and Redis.
    pub small_value_threshold: usize,
    /// Values above this size go to object storage only.
    pub large_value_threshold: usize,
    /// Directory for metrics snapshots.
    pub metrics_dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_cache_size: 1000,
            memory_cache_ttl: Duration::from_secs(3600),
            disk_cache_path: Some(PathBuf::from(".tore_cache/disk")),
            disk_cache_size: 1024 * 1024 * 1024,
            use_redis: false,
            redis_host: "localhost".to_string(),
            redis_port: 6379,
            redis_db: 0,
            redis_key_prefix: "tore:".to_string(),
            redis_timeout: Duration::from_secs(2),
            use_object_storage: false,
            s3_config: None,
            small_value_threshold: MIB,
            large_value_threshold: 100 * MIB,
            metrics_dir: PathBuf::from(".tore_cache/metrics"),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set memory tier capacity and default TTL.
    pub fn with_memory_cache(mut self, size: usize, ttl: Duration) -> Self {
        self.memory_cache_size = size;
        self.memory_cache_ttl = ttl;
        self
    }

    /// Enable the disk tier at `path` with `size` bytes of capacity.
    pub fn with_disk_cache(mut self, path: impl Into<PathBuf>, size: u64) -> Self {
        self.disk_cache_path = Some(path.into());
        self.disk_cache_size = size;
        self
    }

    /// Disable the disk tier.
    pub fn without_disk_cache(mut self) -> Self {
        self.disk_cache_path = None;
        self
    }

    /// Enable the Redis tier.
    pub fn with_redis(mut self, host: impl Into<String>, port: u16, db: i64) -> Self {
        self.use_redis = true;
        self.redis_host = host.into();
        self.redis_port = port;
        self.redis_db = db;
        self
    }

    /// Enable the object-storage tier.
    pub fn with_object_storage(mut self, s3: S3Config) -> Self {
        self.use_object_storage = true;
        self.s3_config = Some(s3);
        self
    }

    /// Set the small/large value boundaries used for tier selection.
    pub fn with_size_thresholds(mut self, small: usize, large: usize) -> Self {
        self.small_value_threshold = small;
        self.large_value_threshold = large;
        self
    }

    pub fn with_metrics_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.metrics_dir = dir.into();
        self
    }

    /// Connection URL for the Redis tier.
    pub fn redis_url(&self) -> String {
        format!(
            "redis://{}:{}/{}",
            self.redis_host, self.redis_port, self.redis_db
        )
    }

    /// Tiers this configuration enables, in priority order.
    pub fn enabled_levels(&self) -> Vec<CacheLevel> {
        CacheLevel::ALL
            .into_iter()
            .filter(|level| match level {
                CacheLevel::Memory => true,
                CacheLevel::Disk => self.disk_cache_path.is_some(),
                CacheLevel::Redis => self.use_redis,
                CacheLevel::Object => self.use_object_storage,
            })
            .collect()
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_cache_size == 0 {
            return Err(invalid("memory_cache_size", 0, "must be positive"));
        }
        if self.small_value_threshold >= self.large_value_threshold {
            return Err(ConfigError::IncompatibleOptions {
                option_a: format!("small_value_threshold={}", self.small_value_threshold),
                option_b: format!("large_value_threshold={}", self.large_value_threshold),
            });
        }
        if self.disk_cache_path.is_some() && self.disk_cache_size < MIB as u64 {
            return Err(invalid(
                "disk_cache_size",
                self.disk_cache_size,
                "must be at least 1 MiB",
            ));
        }
        if self.use_redis && self.redis_host.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "redis_host".to_string(),
            });
        }
        if self.use_object_storage {
            match &self.s3_config {
                None => {
                    return Err(ConfigError::MissingRequired {
                        field: "s3_config".to_string(),
                    })
                }
                Some(s3) if s3.bucket.trim().is_empty() => {
                    return Err(ConfigError::MissingRequired {
                        field: "s3_config.bucket".to_string(),
                    })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Parse a TOML document; missing fields take their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: CacheConfig = toml::from_str(input).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from `TORE_CACHE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    ///
    /// Unset variables keep their default; set but unparsable variables are
    /// an error rather than silently ignored.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        let mut config = Self::default();

        if let Some(v) = parse_var(&var, "MEMORY_SIZE")? {
            config.memory_cache_size = v;
        }
        if let Some(v) = parse_var::<u64, _>(&var, "MEMORY_TTL_SECS")? {
            config.memory_cache_ttl = Duration::from_secs(v);
        }
        if let Some(path) = var("DISK_PATH") {
            config.disk_cache_path = if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }
        if let Some(v) = parse_var(&var, "DISK_SIZE")? {
            config.disk_cache_size = v;
        }
        if let Some(v) = parse_bool_var(&var, "USE_REDIS")? {
            config.use_redis = v;
        }
        if let Some(v) = var("REDIS_HOST") {
            config.redis_host = v;
        }
        if let Some(v) = parse_var(&var, "REDIS_PORT")? {
            config.redis_port = v;
        }
        if let Some(v) = parse_var(&var, "REDIS_DB")? {
            config.redis_db = v;
        }
        if let Some(v) = var("REDIS_PREFIX") {
            config.redis_key_prefix = v;
        }
        if let Some(v) = parse_bool_var(&var, "USE_OBJECT_STORAGE")? {
            config.use_object_storage = v;
        }
        if let (Some(bucket), Some(root)) = (var("S3_BUCKET"), var("S3_ROOT")) {
            let mut s3 = S3Config::new(bucket, root);
            if let Some(prefix) = var("S3_PREFIX") {
                s3.prefix = prefix;
            }
            if let Some(region) = var("S3_REGION") {
                s3.region = region;
            }
            config.s3_config = Some(s3);
        }
        if let Some(v) = var("METRICS_DIR") {
            config.metrics_dir = PathBuf::from(v);
        }

        config.validate()?;
        Ok(config)
    }
}

/// Policy for the incremental processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Fraction of changed pages above which a full reprocess is cheaper.
    pub full_reprocess_ratio: f64,
    /// The ratio guard only applies once at least this many pages changed.
    pub min_changed_pages_for_fallback: usize,
    /// TTL for cached results; `None` keeps them until evicted.
    #[serde(with = "option_duration_secs")]
    pub result_ttl: Option<Duration>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            full_reprocess_ratio: 0.3,
            min_changed_pages_for_fallback: 2,
            result_ttl: None,
        }
    }
}

impl ProcessorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_full_reprocess_ratio(mut self, ratio: f64) -> Self {
        self.full_reprocess_ratio = ratio;
        self
    }

    pub fn with_min_changed_pages(mut self, pages: usize) -> Self {
        self.min_changed_pages_for_fallback = pages;
        self
    }

    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = Some(ttl);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.full_reprocess_ratio) {
            return Err(invalid(
                "full_reprocess_ratio",
                self.full_reprocess_ratio,
                "must be within 0.0..=1.0",
            ));
        }
        Ok(())
    }

    /// Whether `changed` of `total` pages is past the full-reprocess guard.
    pub fn exceeds_fallback(&self, changed: usize, total: usize) -> bool {
        if total == 0 || changed < self.min_changed_pages_for_fallback.max(1) {
            return false;
        }
        changed as f64 / total as f64 > self.full_reprocess_ratio
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_var<T, F>(var: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            invalid(&format!("{}{}", ENV_PREFIX, name), &raw, "unparsable value")
        }),
    }
}

fn parse_bool_var<F>(var: &F, name: &str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = var(name) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(invalid(
            &format!("{}{}", ENV_PREFIX, name),
            &raw,
            "expected a boolean (true/false, 1/0, yes/no, on/off)",
        )),
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod option_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|v| v.map(Duration::from_secs))
    }
}
