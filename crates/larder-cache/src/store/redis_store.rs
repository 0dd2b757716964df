//! Redis-backed store implementation.

use super::KeyValueStore;
use async_trait::async_trait;
use deadpool_redis::{redis::AsyncCommands, Config, Pool, Runtime};
use larder_config::RedisConfig;
use larder_core::{LarderError, LarderResult};
use shaku::Component;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Create a Redis connection pool and verify it with a PING.
pub async fn create_pool(config: &RedisConfig) -> LarderResult<Pool> {
    info!("Creating Redis connection pool for cache...");

    let cfg = Config::from_url(&config.url);

    let pool = cfg
        .builder()
        .map_err(|e| LarderError::Configuration(format!("Invalid Redis config: {}", e)))?
        .max_size(config.pool_size as usize)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| LarderError::Configuration(format!("Failed to create pool: {}", e)))?;

    let mut conn = pool
        .get()
        .await
        .map_err(|e| LarderError::store(format!("Failed to get Redis connection: {}", e)))?;
    deadpool_redis::redis::cmd("PING")
        .query_async::<String>(&mut *conn)
        .await
        .map_err(|e| LarderError::store(format!("Redis PING failed: {}", e)))?;

    info!("Redis connection pool created successfully");

    Ok(pool)
}

/// Milliseconds for a TTL, never rounding a non-zero TTL down to "no TTL".
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Redis-based key-value store.
#[derive(Component)]
#[shaku(interface = KeyValueStore)]
pub struct RedisStore {
    /// Redis connection pool.
    pool: Option<Arc<Pool>>,
}

impl RedisStore {
    /// Create a new Redis store.
    #[must_use]
    pub fn new(pool: Arc<Pool>) -> Self {
        Self { pool: Some(pool) }
    }

    /// Create a store without a pool; every command fails with a store error.
    #[must_use]
    pub fn disabled() -> Self {
        Self { pool: None }
    }

    /// Whether a pool is attached.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.pool.is_some()
    }

    /// Get a connection from the pool.
    async fn get_conn(&self) -> LarderResult<deadpool_redis::Connection> {
        match &self.pool {
            Some(pool) => pool.get().await.map_err(|e| {
                LarderError::store(format!("Failed to get Redis connection: {}", e))
            }),
            None => Err(LarderError::store("Redis store is disabled")),
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> LarderResult<Option<String>> {
        let mut conn = self.get_conn().await?;
        let value: Option<String> = conn.get(key).await.map_err(|e| {
            LarderError::store(format!("Failed to get key '{}': {}", key, e))
        })?;

        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> LarderResult<()> {
        let mut conn = self.get_conn().await?;

        match ttl {
            Some(ttl) => {
                let ttl_ms = ttl_millis(ttl);
                conn.pset_ex::<_, _, ()>(key, value, ttl_ms).await.map_err(|e| {
                    LarderError::store(format!("Failed to set key '{}': {}", key, e))
                })?;
                debug!("Stored key '{}' with TTL {}ms", key, ttl_ms);
            }
            None => {
                conn.set::<_, _, ()>(key, value).await.map_err(|e| {
                    LarderError::store(format!("Failed to set key '{}': {}", key, e))
                })?;
                debug!("Stored key '{}' without TTL", key);
            }
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> LarderResult<bool> {
        let mut conn = self.get_conn().await?;
        let deleted: i64 = conn.del(key).await.map_err(|e| {
            LarderError::store(format!("Failed to delete key '{}': {}", key, e))
        })?;

        debug!("Deleted key '{}': {}", key, deleted > 0);
        Ok(deleted > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> LarderResult<bool> {
        let mut conn = self.get_conn().await?;
        let ttl_ms = i64::try_from(ttl_millis(ttl)).unwrap_or(i64::MAX);
        let applied: bool = conn.pexpire(key, ttl_ms).await.map_err(|e| {
            LarderError::store(format!("Failed to expire key '{}': {}", key, e))
        })?;

        Ok(applied)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> LarderResult<bool> {
        let mut conn = self.get_conn().await?;

        // SET NX PX replies OK on success and nil when the key exists
        let result: Option<String> = deadpool_redis::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut *conn)
            .await
            .map_err(|e| LarderError::store(format!("Failed to set-if-absent key '{}': {}", key, e)))?;

        Ok(result.is_some())
    }

    async fn hash_put_all(&self, key: &str, fields: &HashMap<String, String>) -> LarderResult<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let mut conn = self.get_conn().await?;
        let items: Vec<(&str, &str)> = fields
            .iter()
            .map(|(field, value)| (field.as_str(), value.as_str()))
            .collect();

        conn.hset_multiple::<_, _, _, ()>(key, items.as_slice()).await.map_err(|e| {
            LarderError::store(format!("Failed to write hash '{}': {}", key, e))
        })?;

        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> LarderResult<HashMap<String, String>> {
        let mut conn = self.get_conn().await?;
        let fields: HashMap<String, String> = conn.hgetall(key).await.map_err(|e| {
            LarderError::store(format!("Failed to read hash '{}': {}", key, e))
        })?;

        Ok(fields)
    }
}
