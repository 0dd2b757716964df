//! Common test infrastructure for cache integration tests.
//!
//! Everything runs against the in-process store; no Redis required.

#![allow(dead_code)]

use larder_cache::{CacheOptions, MemoryStore, ReadThroughCache, RebuildExecutor, RebuildExecutorConfig};
use larder_core::{LarderError, LarderResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cached payload used across tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shop {
    pub id: u64,
    pub name: String,
    pub type_id: u64,
}

impl Shop {
    pub fn new(id: u64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            type_id: 1,
        }
    }
}

/// Slow data source that counts its lookups.
pub struct ShopSource {
    rows: Mutex<HashMap<u64, Shop>>,
    calls: AtomicU32,
    active: AtomicU32,
    peak: AtomicU32,
    failing: AtomicBool,
    delay: Duration,
}

impl ShopSource {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(HashMap::new()),
            calls: AtomicU32::new(0),
            active: AtomicU32::new(0),
            peak: AtomicU32::new(0),
            failing: AtomicBool::new(false),
            delay,
        })
    }

    pub fn with_shop(delay: Duration, shop: Shop) -> Arc<Self> {
        let source = Self::new(delay);
        source.upsert(shop);
        source
    }

    pub fn upsert(&self, shop: Shop) {
        self.rows.lock().insert(shop.id, shop);
    }

    pub fn remove(&self, id: u64) {
        self.rows.lock().remove(&id);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most lookups ever running at once.
    pub fn peak(&self) -> u32 {
        self.peak.load(Ordering::SeqCst)
    }

    pub async fn find(&self, id: u64) -> LarderResult<Option<Shop>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        let _active = ActiveLookup(&self.active);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(LarderError::Loader("database unavailable".to_string()));
        }
        Ok(self.rows.lock().get(&id).cloned())
    }
}

/// Decrements the running-lookup count, also when a lookup is cancelled.
struct ActiveLookup<'a>(&'a AtomicU32);

impl Drop for ActiveLookup<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Loader closure over a shared source.
pub fn loader(
    source: &Arc<ShopSource>,
) -> impl FnOnce(u64) -> futures::future::BoxFuture<'static, LarderResult<Option<Shop>>> + Send + 'static {
    let source = source.clone();
    move |id| Box::pin(async move { source.find(id).await })
}

/// Store, executor and client wired for tests.
pub struct TestCache {
    pub store: Arc<MemoryStore>,
    pub executor: Arc<RebuildExecutor>,
    pub cache: ReadThroughCache,
}

impl TestCache {
    pub fn new() -> Self {
        Self::with(fast_options(), RebuildExecutorConfig::default())
    }

    pub fn with(options: CacheOptions, executor: RebuildExecutorConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let executor = Arc::new(RebuildExecutor::new(executor));
        let cache = ReadThroughCache::new(store.clone(), executor.clone(), options);
        Self {
            store,
            executor,
            cache,
        }
    }
}

/// Options with a short mutex backoff so races settle quickly.
pub fn fast_options() -> CacheOptions {
    CacheOptions {
        retry_backoff: Duration::from_millis(5),
        max_attempts: 200,
        ..CacheOptions::default()
    }
}
