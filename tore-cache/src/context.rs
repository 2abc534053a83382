//! Shared cache context.
//!
//! One [`CacheContext`] is built at startup and handed to every component
//! that needs the cache, instead of process-wide singletons.

use std::sync::Arc;

use tore_core::{CacheConfig, ToreResult};

use crate::cache::MultiLevelCache;
use crate::monitor::CacheMonitor;

/// Configuration, monitor and cache, shared by reference.
#[derive(Debug, Clone)]
pub struct CacheContext {
    config: Arc<CacheConfig>,
    monitor: Arc<CacheMonitor>,
    cache: Arc<MultiLevelCache>,
}

impl CacheContext {
    /// Validate `config` and open every tier it enables.
    pub fn new(config: CacheConfig) -> ToreResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let monitor = Arc::new(CacheMonitor::from_config(&config));
        let cache = Arc::new(MultiLevelCache::new(config.clone(), monitor.clone())?);
        Ok(Self {
            config,
            monitor,
            cache,
        })
    }

    /// Wrap an already-built cache; config and monitor are taken from it.
    pub fn from_cache(cache: MultiLevelCache) -> Self {
        let config = cache.config().clone();
        let monitor = cache.monitor().clone();
        Self {
            config,
            monitor,
            cache: Arc::new(cache),
        }
    }

    pub fn config(&self) -> Arc<CacheConfig> {
        self.config.clone()
    }

    pub fn monitor(&self) -> Arc<CacheMonitor> {
        self.monitor.clone()
    }

    pub fn cache(&self) -> Arc<MultiLevelCache> {
        self.cache.clone()
    }
}
