//! Read-through cache client.
//!
//! Three read strategies, picked per call site:
//!
//! | Strategy | On miss | Source load per key | Use for |
//! |---|---|---|---|
//! | [`query_pass_through`](ReadThroughCache::query_pass_through) | load inline | unbounded | cold or low-traffic keys |
//! | [`query_with_mutex`](ReadThroughCache::query_with_mutex) | one loader, others wait | one at a time | expensive hot keys |
//! | [`query_with_logical_expiry`](ReadThroughCache::query_with_logical_expiry) | hard miss; stale reads refresh in background | one per expiry cycle | very hot, pre-warmed keys |
//!
//! Pass-through and mutex keys use the plain encoding and are written with
//! [`set`](ReadThroughCache::set); logical keys use the wrapped encoding and
//! are written with [`set_with_logical_expiry`](ReadThroughCache::set_with_logical_expiry)
//! or [`warm_up`](ReadThroughCache::warm_up). Do not mix them under one key.

use crate::entry::{decode, encode, Lookup, LogicalEntry, NULL_MARKER};
use crate::keys::{cache_key, lock_key, DEFAULT_LOCK_PREFIX};
use crate::lock::DistributedLock;
use crate::metrics::CacheMetrics;
use crate::rebuild::{RebuildExecutor, RebuildTask};
use crate::store::KeyValueStore;
use futures::FutureExt;
use larder_config::LarderConfig;
use larder_core::{LarderError, LarderResult};
use rand::Rng;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const PASS_THROUGH: &str = "pass_through";
const MUTEX: &str = "mutex";
const LOGICAL: &str = "logical";

/// Client tunables.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// TTL of the null marker.
    pub null_ttl: Duration,

    /// Upper bound of the random TTL extension, as a fraction of the TTL.
    pub jitter_ratio: f64,

    /// Prefix prepended to a cache key to form its lock key.
    pub lock_prefix: String,

    /// Lease duration of rebuild locks.
    pub lock_ttl: Duration,

    /// Sleep between mutex attempts.
    pub retry_backoff: Duration,

    /// Reads a mutex query makes before giving up.
    pub max_attempts: u32,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            null_ttl: Duration::from_secs(120),
            jitter_ratio: 0.1,
            lock_prefix: DEFAULT_LOCK_PREFIX.to_string(),
            lock_ttl: Duration::from_secs(10),
            retry_backoff: Duration::from_millis(50),
            max_attempts: 100,
        }
    }
}

impl From<&LarderConfig> for CacheOptions {
    fn from(config: &LarderConfig) -> Self {
        Self {
            null_ttl: config.cache.null_ttl(),
            jitter_ratio: config.cache.jitter_ratio,
            lock_prefix: config.lock.key_prefix.clone(),
            lock_ttl: config.lock.ttl(),
            retry_backoff: config.lock.retry_backoff(),
            max_attempts: config.lock.max_attempts.max(1),
        }
    }
}

/// Generic read-through cache in front of a key-value store.
///
/// Cheap to clone; clones share the store, lock holder, and executor.
#[derive(Clone)]
pub struct ReadThroughCache {
    store: Arc<dyn KeyValueStore>,
    lock: DistributedLock,
    executor: Arc<RebuildExecutor>,
    options: Arc<CacheOptions>,
}

impl ReadThroughCache {
    /// Create a client over `store`, rebuilding logical entries on `executor`.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        executor: Arc<RebuildExecutor>,
        options: CacheOptions,
    ) -> Self {
        Self {
            lock: DistributedLock::new(store.clone()),
            store,
            executor,
            options: Arc::new(options),
        }
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Rebuild executor.
    pub fn executor(&self) -> &Arc<RebuildExecutor> {
        &self.executor
    }

    /// Client tunables.
    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Store `value` with the plain encoding and a storage TTL.
    pub async fn set<V>(&self, key: &str, value: &V, ttl: Duration) -> LarderResult<()>
    where
        V: Serialize + ?Sized + Sync,
    {
        let raw = encode(value)?;
        self.store.set(key, &raw, Some(ttl)).await
    }

    /// Store `value` wrapped with a logical expiry `ttl` from now.
    ///
    /// No storage TTL is set; the key lives until overwritten or deleted.
    pub async fn set_with_logical_expiry<V>(&self, key: &str, value: &V, ttl: Duration) -> LarderResult<()>
    where
        V: Serialize + Sync,
    {
        let raw = encode(&LogicalEntry::new(value, ttl))?;
        self.store.set(key, &raw, None).await
    }

    /// Delete a cached entry, typically right after the source was updated.
    ///
    /// Returns `true` if an entry was removed.
    pub async fn invalidate(&self, key: &str) -> LarderResult<bool> {
        let removed = self.store.delete(key).await?;
        debug!(key = %key, removed, "Cache entry invalidated");
        Ok(removed)
    }

    /// Read through the cache, loading inline on a miss.
    ///
    /// A confirmed absence is cached as the null marker for the configured
    /// null TTL. Concurrent misses may each call the loader.
    pub async fn query_pass_through<ID, V, F, Fut>(
        &self,
        prefix: &str,
        id: ID,
        loader: F,
        ttl: Duration,
    ) -> LarderResult<Option<V>>
    where
        ID: Display,
        V: Serialize + DeserializeOwned,
        F: FnOnce(ID) -> Fut,
        Fut: Future<Output = LarderResult<Option<V>>>,
    {
        let key = cache_key(prefix, &id);

        match Lookup::from_raw(self.store.get(&key).await?) {
            Lookup::Value(raw) => {
                CacheMetrics::hit(PASS_THROUGH);
                decode(&key, &raw).map(Some)
            }
            Lookup::NullMarker => {
                CacheMetrics::null_hit(PASS_THROUGH);
                debug!(key = %key, "Null marker hit");
                Ok(None)
            }
            Lookup::Missing => {
                CacheMetrics::miss(PASS_THROUGH);
                self.load_and_populate(&key, id, loader, ttl, PASS_THROUGH).await
            }
        }
    }

    /// Read through the cache, admitting one loader per key at a time.
    ///
    /// Losers of the lock race sleep for the retry backoff and read again.
    /// After `max_attempts` reads without a value the call fails with
    /// [`LarderError::Unavailable`].
    pub async fn query_with_mutex<ID, V, F, Fut>(
        &self,
        prefix: &str,
        id: ID,
        loader: F,
        ttl: Duration,
    ) -> LarderResult<Option<V>>
    where
        ID: Display,
        V: Serialize + DeserializeOwned,
        F: FnOnce(ID) -> Fut,
        Fut: Future<Output = LarderResult<Option<V>>>,
    {
        let key = cache_key(prefix, &id);
        let lock_key = lock_key(&self.options.lock_prefix, &key);
        let max_attempts = self.options.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match Lookup::from_raw(self.store.get(&key).await?) {
                Lookup::Value(raw) => {
                    CacheMetrics::hit(MUTEX);
                    return decode(&key, &raw).map(Some);
                }
                Lookup::NullMarker => {
                    CacheMetrics::null_hit(MUTEX);
                    return Ok(None);
                }
                Lookup::Missing => {}
            }

            if self.lock.try_acquire(&lock_key, self.options.lock_ttl).await? {
                CacheMetrics::miss(MUTEX);
                return self.rebuild_under_lock(&key, &lock_key, id, loader, ttl).await;
            }

            if attempt < max_attempts {
                debug!(key = %key, attempt, "Rebuild in progress elsewhere, backing off");
                tokio::time::sleep(self.options.retry_backoff).await;
            }
        }

        CacheMetrics::unavailable();
        warn!(key = %key, attempts = max_attempts, "Gave up waiting for cache rebuild");
        Err(LarderError::Unavailable {
            key,
            attempts: max_attempts,
        })
    }

    /// Read a logically expiring entry without ever blocking on the source.
    ///
    /// A missing key is a hard miss: the loader is not called. A stale entry
    /// is returned as is, and the first reader to win the rebuild lock
    /// schedules a background refresh on the executor.
    pub async fn query_with_logical_expiry<ID, V, F, Fut>(
        &self,
        prefix: &str,
        id: ID,
        loader: F,
        ttl: Duration,
    ) -> LarderResult<Option<V>>
    where
        ID: Display + Send + 'static,
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce(ID) -> Fut + Send + 'static,
        Fut: Future<Output = LarderResult<Option<V>>> + Send + 'static,
    {
        let key = cache_key(prefix, &id);

        let raw = match Lookup::from_raw(self.store.get(&key).await?) {
            Lookup::Value(raw) => raw,
            Lookup::NullMarker | Lookup::Missing => {
                CacheMetrics::miss(LOGICAL);
                debug!(key = %key, "Logical entry not populated");
                return Ok(None);
            }
        };

        let entry: LogicalEntry<V> = decode(&key, &raw)?;
        if entry.is_fresh() {
            CacheMetrics::hit(LOGICAL);
            return Ok(Some(entry.data));
        }

        CacheMetrics::stale_hit();
        let lock_key = lock_key(&self.options.lock_prefix, &key);
        if self.lock.try_acquire(&lock_key, self.options.lock_ttl).await? {
            self.schedule_rebuild(key, lock_key, id, loader, ttl);
        }

        Ok(Some(entry.data))
    }

    /// Load from the source and write a logical entry.
    ///
    /// Returns `false` when the source has no record; nothing is written then.
    pub async fn warm_up<ID, V, F, Fut>(
        &self,
        prefix: &str,
        id: ID,
        loader: F,
        ttl: Duration,
    ) -> LarderResult<bool>
    where
        ID: Display,
        V: Serialize + Sync,
        F: FnOnce(ID) -> Fut,
        Fut: Future<Output = LarderResult<Option<V>>>,
    {
        let key = cache_key(prefix, &id);

        match loader(id).await? {
            Some(value) => {
                self.set_with_logical_expiry(&key, &value, ttl).await?;
                info!(key = %key, ttl_secs = ttl.as_secs(), "Cache entry warmed up");
                Ok(true)
            }
            None => {
                debug!(key = %key, "Nothing to warm up");
                Ok(false)
            }
        }
    }

    /// Call the loader and cache its answer; a loader error leaves the cache untouched.
    async fn load_and_populate<ID, V, F, Fut>(
        &self,
        key: &str,
        id: ID,
        loader: F,
        ttl: Duration,
        strategy: &'static str,
    ) -> LarderResult<Option<V>>
    where
        V: Serialize,
        F: FnOnce(ID) -> Fut,
        Fut: Future<Output = LarderResult<Option<V>>>,
    {
        let started = Instant::now();
        let loaded = match loader(id).await {
            Ok(loaded) => loaded,
            Err(e) => {
                CacheMetrics::load_failed(strategy);
                warn!(key = %key, strategy, error = %e, "Source lookup failed");
                return Err(e);
            }
        };
        CacheMetrics::load(strategy, loaded.is_some(), started.elapsed());

        match &loaded {
            Some(value) => {
                let raw = encode(value)?;
                self.store.set(key, &raw, Some(self.jittered(ttl))).await?;
                debug!(key = %key, strategy, "Cache populated from source");
            }
            None => {
                self.store.set(key, NULL_MARKER, Some(self.options.null_ttl)).await?;
                debug!(key = %key, strategy, "Source has no record, null marker cached");
            }
        }

        Ok(loaded)
    }

    /// Mutex path once the lock is held. The lock is released on every exit,
    /// including a panicking loader.
    async fn rebuild_under_lock<ID, V, F, Fut>(
        &self,
        key: &str,
        lock_key: &str,
        id: ID,
        loader: F,
        ttl: Duration,
    ) -> LarderResult<Option<V>>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce(ID) -> Fut,
        Fut: Future<Output = LarderResult<Option<V>>>,
    {
        let outcome = AssertUnwindSafe(async {
            // A previous holder may have populated the key after our read.
            match Lookup::from_raw(self.store.get(key).await?) {
                Lookup::Value(raw) => return decode(key, &raw).map(Some),
                Lookup::NullMarker => return Ok(None),
                Lookup::Missing => {}
            }
            self.load_and_populate(key, id, loader, ttl, MUTEX).await
        })
        .catch_unwind()
        .await;

        self.lock.release_quietly(lock_key).await;

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    fn schedule_rebuild<ID, V, F, Fut>(&self, key: String, lock_key: String, id: ID, loader: F, ttl: Duration)
    where
        ID: Send + 'static,
        V: Serialize + Send + Sync + 'static,
        F: FnOnce(ID) -> Fut + Send + 'static,
        Fut: Future<Output = LarderResult<Option<V>>> + Send + 'static,
    {
        let client = self.clone();
        let work_key = key.clone();
        let work = async move { client.refresh_logical(&work_key, id, loader, ttl).await };

        let lock = self.lock.clone();
        let task = RebuildTask::new(key.clone(), work).with_cleanup(async move {
            lock.release_quietly(&lock_key).await;
        });

        match self.executor.submit(task) {
            Ok(()) => debug!(key = %key, "Logical rebuild scheduled"),
            Err(e) => warn!(key = %key, error = %e, "Logical rebuild not scheduled, serving stale value"),
        }
    }

    /// Background half of the logical strategy, run while holding the lock.
    async fn refresh_logical<ID, V, F, Fut>(&self, key: &str, id: ID, loader: F, ttl: Duration) -> LarderResult<()>
    where
        V: Serialize + Sync,
        F: FnOnce(ID) -> Fut,
        Fut: Future<Output = LarderResult<Option<V>>>,
    {
        // Skip if a rebuild that finished before our lock already refreshed it.
        if let Lookup::Value(raw) = Lookup::from_raw(self.store.get(key).await?) {
            let current: LogicalEntry<IgnoredAny> = decode(key, &raw)?;
            if current.is_fresh() {
                debug!(key = %key, "Entry already refreshed");
                return Ok(());
            }
        }

        let started = Instant::now();
        let loaded = match loader(id).await {
            Ok(loaded) => loaded,
            Err(e) => {
                CacheMetrics::load_failed(LOGICAL);
                return Err(e);
            }
        };
        CacheMetrics::load(LOGICAL, loaded.is_some(), started.elapsed());

        match loaded {
            Some(value) => {
                self.set_with_logical_expiry(key, &value, ttl).await?;
                debug!(key = %key, "Logical entry refreshed");
            }
            None => {
                self.store.delete(key).await?;
                info!(key = %key, "Source no longer has the record, logical entry dropped");
            }
        }
        Ok(())
    }

    /// `ttl` plus a random extension of up to `jitter_ratio * ttl`.
    fn jittered(&self, ttl: Duration) -> Duration {
        let ratio = self.options.jitter_ratio.clamp(0.0, 1.0);
        let max_ms = (ttl.as_millis() as f64 * ratio) as u64;
        if max_ms == 0 {
            return ttl;
        }
        ttl.saturating_add(Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms)))
    }
}

impl std::fmt::Debug for ReadThroughCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadThroughCache")
            .field("lock", &self.lock)
            .field("executor", &self.executor)
            .field("options", &self.options)
            .finish()
    }
}
