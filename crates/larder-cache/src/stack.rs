//! Assembly of a ready-to-use cache stack from configuration.

use crate::client::{CacheOptions, ReadThroughCache};
use crate::metrics::register_metrics;
use crate::rebuild::{RebuildExecutor, RebuildExecutorConfig};
use crate::store::{create_pool, KeyValueStore, MemoryStore, RedisStore};
use larder_config::LarderConfig;
use larder_core::LarderResult;
use std::sync::Arc;
use tracing::info;

/// Store, rebuild executor and client wired together.
#[derive(Debug, Clone)]
pub struct CacheStack {
    executor: Arc<RebuildExecutor>,
    cache: ReadThroughCache,
}

impl CacheStack {
    /// Build the stack from configuration.
    ///
    /// Uses Redis when `redis.enabled`, the in-process store otherwise.
    pub async fn from_config(config: &LarderConfig) -> LarderResult<Self> {
        let store: Arc<dyn KeyValueStore> = if config.redis.enabled {
            let pool = create_pool(&config.redis).await?;
            Arc::new(RedisStore::new(Arc::new(pool)))
        } else {
            info!("Redis disabled, using in-process store");
            Arc::new(MemoryStore::new())
        };

        Ok(Self::with_store(store, config))
    }

    /// Build the stack over an existing store.
    pub fn with_store(store: Arc<dyn KeyValueStore>, config: &LarderConfig) -> Self {
        if config.observability.metrics_enabled {
            register_metrics();
        }

        let executor = Arc::new(RebuildExecutor::new(RebuildExecutorConfig::from(&config.rebuild)));
        let cache = ReadThroughCache::new(store, executor.clone(), CacheOptions::from(config));

        info!(
            executor_id = %executor.id(),
            concurrency = executor.config().concurrency,
            queue_capacity = executor.config().queue_capacity,
            "Cache stack ready"
        );

        Self { executor, cache }
    }

    /// The read-through client.
    pub fn cache(&self) -> &ReadThroughCache {
        &self.cache
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        self.cache.store()
    }

    /// The rebuild executor.
    pub fn executor(&self) -> &Arc<RebuildExecutor> {
        &self.executor
    }

    /// Stop accepting rebuilds and wait for in-flight ones.
    pub async fn shutdown(&self) -> bool {
        self.executor.shutdown().await
    }
}
