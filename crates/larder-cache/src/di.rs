//! Dependency injection wiring for the cache layer.
//!
//! Hosts that assemble their services with Shaku resolve the store as
//! `Arc<dyn KeyValueStore>` from [`CacheModule`].

use crate::store::{create_pool, KeyValueStore, RedisStore, RedisStoreParameters};
use larder_config::RedisConfig;
use larder_core::{module, HasComponent, LarderResult};
use std::sync::Arc;

module! {
    pub CacheModule {
        components = [
            RedisStore,
        ],
        providers = [],
    }
}

/// Build the cache module, connecting to Redis when it is enabled.
///
/// With Redis disabled the module still resolves a store, but every command
/// fails with a store error.
pub async fn build_cache_module(config: &RedisConfig) -> LarderResult<Arc<CacheModule>> {
    let pool = if config.enabled {
        Some(Arc::new(create_pool(config).await?))
    } else {
        None
    };

    let module = CacheModule::builder()
        .with_component_parameters::<RedisStore>(RedisStoreParameters { pool })
        .build();

    Ok(Arc::new(module))
}

/// Resolve the store from a built module.
pub fn resolve_store(module: &CacheModule) -> Arc<dyn KeyValueStore> {
    module.resolve()
}
