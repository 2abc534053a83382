//! Redis tier.
//!
//! A single synchronous connection guarded by a mutex. Every key is
//! namespaced under `redis_key_prefix` so `clear` only touches this cache's
//! keyspace. Expiry is delegated to Redis (`PSETEX` / `PTTL`).

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use redis::{Commands, Connection, RedisError};
use tore_core::{CacheConfig, CacheError, CacheLevel, CacheResult};

use super::traits::{CacheBackend, CacheStats};

struct RedisInner {
    conn: Connection,
    stats: CacheStats,
}

/// Redis-backed cache tier.
pub struct RedisCacheBackend {
    inner: Mutex<RedisInner>,
    prefix: String,
}

impl std::fmt::Debug for RedisCacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheBackend")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

fn map_redis_err(e: RedisError) -> CacheError {
    if e.is_timeout() {
        CacheError::Timeout {
            level: CacheLevel::Redis,
            reason: e.to_string(),
        }
    } else if e.is_connection_refusal() || e.is_connection_dropped() {
        CacheError::Connection {
            level: CacheLevel::Redis,
            reason: e.to_string(),
        }
    } else {
        CacheError::backend(CacheLevel::Redis, e.to_string())
    }
}

fn connection_err(e: RedisError) -> CacheError {
    CacheError::Connection {
        level: CacheLevel::Redis,
        reason: e.to_string(),
    }
}

impl RedisCacheBackend {
    /// Connect to the server named by `config` and verify it with `PING`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Connection`] if the server is unreachable, so a
    /// misconfigured tier fails at startup instead of on first use.
    pub fn connect(config: &CacheConfig) -> CacheResult<Self> {
        let url = config.redis_url();
        let client = redis::Client::open(url.as_str()).map_err(connection_err)?;

        let timeout = config.redis_timeout.max(Duration::from_millis(1));
        let mut conn = client
            .get_connection_with_timeout(timeout)
            .map_err(connection_err)?;
        conn.set_read_timeout(Some(timeout)).map_err(connection_err)?;
        conn.set_write_timeout(Some(timeout))
            .map_err(connection_err)?;

        let _: String = redis::cmd("PING").query(&mut conn).map_err(connection_err)?;
        tracing::info!(url = %url, prefix = %config.redis_key_prefix, "Connected to Redis cache tier");

        Ok(Self {
            inner: Mutex::new(RedisInner {
                conn,
                stats: CacheStats::default(),
            }),
            prefix: config.redis_key_prefix.clone(),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn lock(&self) -> CacheResult<MutexGuard<'_, RedisInner>> {
        self.inner.lock().map_err(|_| CacheError::LockPoisoned {
            level: CacheLevel::Redis,
        })
    }
}

impl CacheBackend for RedisCacheBackend {
    fn level(&self) -> CacheLevel {
        CacheLevel::Redis
    }

    fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let key = self.namespaced(key);
        let mut inner = self.lock()?;
        let value: Option<Vec<u8>> = inner.conn.get(&key).map_err(map_redis_err)?;
        if value.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<u64> {
        let key = self.namespaced(key);
        let mut inner = self.lock()?;
        match ttl {
            // PSETEX rejects a zero expiry; an already-expired write is a delete.
            Some(ttl) if ttl.as_millis() == 0 => {
                let _: u64 = inner.conn.del(&key).map_err(map_redis_err)?;
                return Ok(0);
            }
            Some(ttl) => {
                let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
                let _: () = inner
                    .conn
                    .pset_ex(&key, value, millis)
                    .map_err(map_redis_err)?;
            }
            None => {
                let _: () = inner.conn.set(&key, value).map_err(map_redis_err)?;
            }
        }
        inner.stats.memory_bytes += value.len() as u64;
        inner.stats.entry_count += 1;
        // Redis applies its own maxmemory policy; evictions are not observable here.
        Ok(0)
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        let key = self.namespaced(key);
        let mut inner = self.lock()?;
        let removed: u64 = inner.conn.del(&key).map_err(map_redis_err)?;
        if removed > 0 {
            inner.stats.entry_count = inner.stats.entry_count.saturating_sub(1);
        }
        Ok(removed > 0)
    }

    fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let key = self.namespaced(key);
        let mut inner = self.lock()?;
        // -2: absent, -1: no expiry.
        let millis: i64 = inner.conn.pttl(&key).map_err(map_redis_err)?;
        Ok((millis >= 0).then(|| Duration::from_millis(millis as u64)))
    }

    fn clear(&self) -> CacheResult<u64> {
        let pattern = format!("{}*", self.prefix);
        let mut inner = self.lock()?;
        let keys: Vec<String> = inner
            .conn
            .scan_match::<_, String>(&pattern)
            .map_err(map_redis_err)?
            .collect();

        let mut removed = 0;
        for chunk in keys.chunks(256) {
            let n: u64 = inner.conn.del(chunk).map_err(map_redis_err)?;
            removed += n;
        }
        inner.stats.entry_count = 0;
        inner.stats.memory_bytes = 0;
        Ok(removed)
    }

    fn stats(&self) -> CacheStats {
        self.inner
            .lock()
            .map(|inner| inner.stats.clone())
            .unwrap_or_default()
    }
}
