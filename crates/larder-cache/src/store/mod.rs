//! Key-value store abstraction the cache layer runs on.
//!
//! The store is an external collaborator: Redis in production, an in-process
//! map for local development and tests. All coordination goes through its
//! atomic primitives, so implementations must make `set_if_absent` atomic.

mod memory_store;
mod redis_store;

pub use memory_store::MemoryStore;
pub use redis_store::{create_pool, RedisStore, RedisStoreParameters};

use async_trait::async_trait;
use larder_core::{Interface, LarderResult};
use std::collections::HashMap;
use std::time::Duration;

/// String key-value store with per-key TTL.
///
/// Uses raw strings for storage to stay dyn-compatible; typed encoding lives
/// in [`crate::entry`].
#[async_trait]
pub trait KeyValueStore: Interface + Send + Sync {
    /// Get the string stored at `key`.
    ///
    /// Returns `None` if the key doesn't exist or has expired. An empty
    /// string is a stored value, not an absence.
    async fn get(&self, key: &str) -> LarderResult<Option<String>>;

    /// Store a string, replacing any previous value and TTL.
    ///
    /// With `ttl = None` the key never expires.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> LarderResult<()>;

    /// Delete a key.
    ///
    /// Returns `true` if the key existed and was deleted.
    async fn delete(&self, key: &str) -> LarderResult<bool>;

    /// Set a TTL on an existing key.
    ///
    /// Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> LarderResult<bool>;

    /// Atomically store `value` with `ttl` only if `key` is absent.
    ///
    /// Returns `true` iff this call created the key.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> LarderResult<bool>;

    /// Write all fields into the hash at `key`, keeping its TTL.
    async fn hash_put_all(&self, key: &str, fields: &HashMap<String, String>) -> LarderResult<()>;

    /// Read every field of the hash at `key`; empty when the key is absent.
    async fn hash_get_all(&self, key: &str) -> LarderResult<HashMap<String, String>>;
}
