//! Integration tests for the read-through strategies.
//!
//! Loaders count their calls so each test can assert how often the slow
//! path was hit.

mod common;

use common::{fast_options, loader, Shop, ShopSource, TestCache};
use larder_cache::entry::{encode, LogicalEntry};
use larder_cache::keys::{cache_key, lock_key, CACHE_SHOP_KEY, DEFAULT_LOCK_PREFIX};
use larder_cache::{CacheOptions, KeyValueStore, RebuildExecutorConfig, RebuildTask};
use larder_core::LarderError;
use std::sync::Arc;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(30);

fn shop_key(id: u64) -> String {
    cache_key(CACHE_SHOP_KEY, id)
}

fn shop_lock(id: u64) -> String {
    lock_key(DEFAULT_LOCK_PREFIX, &shop_key(id))
}

async fn seed_expired(harness: &TestCache, shop: &Shop) {
    let expired = LogicalEntry::expiring_at(shop.clone(), chrono::Utc::now() - chrono::Duration::seconds(1));
    harness
        .store
        .set(&shop_key(shop.id), &encode(&expired).unwrap(), None)
        .await
        .unwrap();
}

// ============================================================================
// Pass-through
// ============================================================================

#[tokio::test]
async fn test_pass_through_caches_loaded_value() {
    let harness = TestCache::new();
    let source = ShopSource::with_shop(Duration::ZERO, Shop::new(1, "X"));

    let first = harness
        .cache
        .query_pass_through(CACHE_SHOP_KEY, 1, loader(&source), TTL)
        .await
        .unwrap();
    let second = harness
        .cache
        .query_pass_through(CACHE_SHOP_KEY, 1, loader(&source), TTL)
        .await
        .unwrap();

    assert_eq!(first, Some(Shop::new(1, "X")));
    assert_eq!(second, first);
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn test_pass_through_caches_absence() {
    let harness = TestCache::new();
    let source = ShopSource::new(Duration::ZERO);

    for _ in 0..2 {
        let shop = harness
            .cache
            .query_pass_through(CACHE_SHOP_KEY, 404, loader(&source), TTL)
            .await
            .unwrap();
        assert_eq!(shop, None);
    }

    assert_eq!(source.calls(), 1);
    assert_eq!(harness.store.get(&shop_key(404)).await.unwrap(), Some(String::new()));
}

#[tokio::test(start_paused = true)]
async fn test_null_marker_expires_after_null_ttl() {
    let harness = TestCache::with(
        CacheOptions {
            null_ttl: Duration::from_secs(120),
            ..fast_options()
        },
        RebuildExecutorConfig::default(),
    );
    let source = ShopSource::new(Duration::ZERO);

    let miss = harness
        .cache
        .query_pass_through(CACHE_SHOP_KEY, 7, loader(&source), TTL)
        .await
        .unwrap();
    assert_eq!(miss, None);

    source.upsert(Shop::new(7, "late arrival"));
    tokio::time::advance(Duration::from_secs(121)).await;

    let found = harness
        .cache
        .query_pass_through(CACHE_SHOP_KEY, 7, loader(&source), TTL)
        .await
        .unwrap();
    assert_eq!(found, Some(Shop::new(7, "late arrival")));
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn test_pass_through_loader_failure_leaves_cache_untouched() {
    let harness = TestCache::new();
    let source = ShopSource::with_shop(Duration::ZERO, Shop::new(1, "X"));
    source.set_failing(true);

    let result = harness
        .cache
        .query_pass_through(CACHE_SHOP_KEY, 1, loader(&source), TTL)
        .await;

    assert!(matches!(result, Err(LarderError::Loader(_))));
    assert_eq!(harness.store.get(&shop_key(1)).await.unwrap(), None);
}

#[tokio::test]
async fn test_decode_error_is_not_a_miss() {
    let harness = TestCache::new();
    let source = ShopSource::with_shop(Duration::ZERO, Shop::new(1, "X"));
    harness.store.set(&shop_key(1), "{corrupted", None).await.unwrap();

    let pass_through = harness
        .cache
        .query_pass_through(CACHE_SHOP_KEY, 1, loader(&source), TTL)
        .await;
    let mutex = harness
        .cache
        .query_with_mutex(CACHE_SHOP_KEY, 1, loader(&source), TTL)
        .await;

    assert!(matches!(pass_through, Err(LarderError::Decode { .. })));
    assert!(matches!(mutex, Err(LarderError::Decode { .. })));
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn test_set_then_read_roundtrip() {
    let harness = TestCache::new();
    let source = ShopSource::new(Duration::ZERO);
    let shop = Shop::new(3, "Round Trip Bakery");

    harness.cache.set(&shop_key(3), &shop, TTL).await.unwrap();
    let read = harness
        .cache
        .query_pass_through(CACHE_SHOP_KEY, 3, loader(&source), TTL)
        .await
        .unwrap();

    assert_eq!(read, Some(shop));
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn test_update_then_invalidate() {
    let harness = TestCache::new();
    let source = ShopSource::with_shop(Duration::ZERO, Shop::new(1, "old name"));

    harness
        .cache
        .query_pass_through(CACHE_SHOP_KEY, 1, loader(&source), TTL)
        .await
        .unwrap();

    source.upsert(Shop::new(1, "new name"));
    assert!(harness.cache.invalidate(&shop_key(1)).await.unwrap());

    let fresh = harness
        .cache
        .query_pass_through(CACHE_SHOP_KEY, 1, loader(&source), TTL)
        .await
        .unwrap();
    assert_eq!(fresh, Some(Shop::new(1, "new name")));
    assert_eq!(source.calls(), 2);
}

// ============================================================================
// Mutex
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutex_admits_exactly_one_loader() {
    let harness = Arc::new(TestCache::new());
    let source = ShopSource::with_shop(Duration::from_millis(50), Shop::new(1, "hot shop"));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let harness = harness.clone();
        let source = source.clone();
        handles.push(tokio::spawn(async move {
            harness
                .cache
                .query_with_mutex(CACHE_SHOP_KEY, 1, loader(&source), TTL)
                .await
        }));
    }

    for handle in handles {
        let shop = handle.await.unwrap().unwrap();
        assert_eq!(shop, Some(Shop::new(1, "hot shop")));
    }

    assert_eq!(source.calls(), 1);
    assert_eq!(harness.store.get(&shop_lock(1)).await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutex_shares_confirmed_absence() {
    let harness = Arc::new(TestCache::new());
    let source = ShopSource::new(Duration::from_millis(30));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let harness = harness.clone();
        let source = source.clone();
        handles.push(tokio::spawn(async move {
            harness
                .cache
                .query_with_mutex(CACHE_SHOP_KEY, 404, loader(&source), TTL)
                .await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), None);
    }
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn test_mutex_loader_failure_releases_lock() {
    let harness = TestCache::new();
    let source = ShopSource::with_shop(Duration::ZERO, Shop::new(1, "X"));
    source.set_failing(true);

    let failed = harness
        .cache
        .query_with_mutex(CACHE_SHOP_KEY, 1, loader(&source), TTL)
        .await;
    assert!(matches!(failed, Err(LarderError::Loader(_))));
    assert_eq!(harness.store.get(&shop_key(1)).await.unwrap(), None);
    assert_eq!(harness.store.get(&shop_lock(1)).await.unwrap(), None);

    source.set_failing(false);
    let recovered = harness
        .cache
        .query_with_mutex(CACHE_SHOP_KEY, 1, loader(&source), TTL)
        .await
        .unwrap();
    assert_eq!(recovered, Some(Shop::new(1, "X")));
}

#[tokio::test]
async fn test_mutex_panicking_loader_releases_lock() {
    let harness = Arc::new(TestCache::new());

    let task_harness = harness.clone();
    let outcome = tokio::spawn(async move {
        task_harness
            .cache
            .query_with_mutex::<u64, Shop, _, _>(
                CACHE_SHOP_KEY,
                1,
                |_id| async move { panic!("loader bug") },
                TTL,
            )
            .await
    })
    .await;

    assert!(outcome.unwrap_err().is_panic());
    assert_eq!(harness.store.get(&shop_lock(1)).await.unwrap(), None);
}

#[tokio::test]
async fn test_mutex_gives_up_after_max_attempts() {
    let harness = TestCache::with(
        CacheOptions {
            retry_backoff: Duration::from_millis(1),
            max_attempts: 3,
            ..CacheOptions::default()
        },
        RebuildExecutorConfig::default(),
    );
    let source = ShopSource::with_shop(Duration::ZERO, Shop::new(1, "X"));
    harness
        .store
        .set_if_absent(&shop_lock(1), "another-node", Duration::from_secs(10))
        .await
        .unwrap();

    let result = harness
        .cache
        .query_with_mutex(CACHE_SHOP_KEY, 1, loader(&source), TTL)
        .await;

    match result {
        Err(LarderError::Unavailable { key, attempts }) => {
            assert_eq!(key, shop_key(1));
            assert_eq!(attempts, 3);
        }
        other => panic!("expected Unavailable, got {other:?}"),
    }
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn test_mutex_waiter_sees_value_written_by_holder() {
    let harness = Arc::new(TestCache::new());
    let source = ShopSource::with_shop(Duration::ZERO, Shop::new(1, "X"));
    harness
        .store
        .set_if_absent(&shop_lock(1), "another-node", Duration::from_secs(10))
        .await
        .unwrap();

    let waiter = {
        let harness = harness.clone();
        let source = source.clone();
        tokio::spawn(async move {
            harness
                .cache
                .query_with_mutex(CACHE_SHOP_KEY, 1, loader(&source), TTL)
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    harness.cache.set(&shop_key(1), &Shop::new(1, "from holder"), TTL).await.unwrap();
    harness.store.delete(&shop_lock(1)).await.unwrap();

    let shop = waiter.await.unwrap().unwrap();
    assert_eq!(shop, Some(Shop::new(1, "from holder")));
    assert_eq!(source.calls(), 0);
}

// ============================================================================
// Logical expiry
// ============================================================================

#[tokio::test]
async fn test_logical_missing_key_is_hard_miss() {
    let harness = TestCache::new();
    let source = ShopSource::with_shop(Duration::ZERO, Shop::new(1, "X"));

    let shop = harness
        .cache
        .query_with_logical_expiry(CACHE_SHOP_KEY, 1, loader(&source), TTL)
        .await
        .unwrap();

    assert_eq!(shop, None);
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn test_logical_fresh_entry_served_without_loader() {
    let harness = TestCache::new();
    let source = ShopSource::with_shop(Duration::ZERO, Shop::new(1, "warm"));

    assert!(harness.cache.warm_up(CACHE_SHOP_KEY, 1, loader(&source), TTL).await.unwrap());
    let shop = harness
        .cache
        .query_with_logical_expiry(CACHE_SHOP_KEY, 1, loader(&source), TTL)
        .await
        .unwrap();

    assert_eq!(shop, Some(Shop::new(1, "warm")));
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn test_logical_stale_read_refreshes_in_background() {
    let harness = TestCache::new();
    let source = ShopSource::with_shop(Duration::from_millis(100), Shop::new(1, "Z"));
    seed_expired(&harness, &Shop::new(1, "Y")).await;

    let first = harness
        .cache
        .query_with_logical_expiry(CACHE_SHOP_KEY, 1, loader(&source), TTL)
        .await
        .unwrap();
    let concurrent = harness
        .cache
        .query_with_logical_expiry(CACHE_SHOP_KEY, 1, loader(&source), TTL)
        .await
        .unwrap();
    assert_eq!(first, Some(Shop::new(1, "Y")));
    assert_eq!(concurrent, Some(Shop::new(1, "Y")));

    assert!(harness.executor.drain(Duration::from_secs(2)).await);

    let after = harness
        .cache
        .query_with_logical_expiry(CACHE_SHOP_KEY, 1, loader(&source), TTL)
        .await
        .unwrap();
    assert_eq!(after, Some(Shop::new(1, "Z")));
    assert_eq!(source.calls(), 1);
    assert_eq!(harness.store.get(&shop_lock(1)).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_logical_stale_read_does_not_wait_for_loader() {
    let harness = TestCache::new();
    let source = ShopSource::with_shop(Duration::from_secs(5), Shop::new(1, "Z"));
    seed_expired(&harness, &Shop::new(1, "Y")).await;

    let started = tokio::time::Instant::now();
    let stale = harness
        .cache
        .query_with_logical_expiry(CACHE_SHOP_KEY, 1, loader(&source), TTL)
        .await
        .unwrap();

    assert_eq!(stale, Some(Shop::new(1, "Y")));
    assert!(started.elapsed() < Duration::from_millis(100));

    assert!(harness.executor.drain(Duration::from_secs(10)).await);
    assert!(started.elapsed() >= Duration::from_secs(5));
    let fresh = harness
        .cache
        .query_with_logical_expiry(CACHE_SHOP_KEY, 1, loader(&source), TTL)
        .await
        .unwrap();
    assert_eq!(fresh, Some(Shop::new(1, "Z")));
}

#[tokio::test(start_paused = true)]
async fn test_queued_rebuild_cannot_outlive_its_lock() {
    let harness = TestCache::with(
        CacheOptions {
            lock_ttl: Duration::from_secs(10),
            ..fast_options()
        },
        RebuildExecutorConfig {
            concurrency: 2,
            queue_capacity: 8,
            task_timeout: Duration::from_secs(8),
            ..RebuildExecutorConfig::default()
        },
    );
    let source = ShopSource::with_shop(Duration::from_secs(3), Shop::new(1, "Z"));
    seed_expired(&harness, &Shop::new(1, "Y")).await;

    for i in 0..2 {
        harness
            .executor
            .submit(RebuildTask::new(format!("busy:{i}"), async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }))
            .unwrap();
    }

    // Queued behind the busy tasks while holding the key's lock.
    let first = harness
        .cache
        .query_with_logical_expiry(CACHE_SHOP_KEY, 1, loader(&source), TTL)
        .await
        .unwrap();
    assert_eq!(first, Some(Shop::new(1, "Y")));

    tokio::time::sleep(Duration::from_millis(10_500)).await;
    let second = harness
        .cache
        .query_with_logical_expiry(CACHE_SHOP_KEY, 1, loader(&source), TTL)
        .await
        .unwrap();
    assert_eq!(second, Some(Shop::new(1, "Y")));

    assert!(harness.executor.drain(Duration::from_secs(30)).await);
    assert_eq!(source.peak(), 1);
    assert!(harness.executor.stats().timed_out >= 3);
    assert_eq!(harness.store.get(&shop_lock(1)).await.unwrap(), None);

    let refreshed = harness
        .cache
        .query_with_logical_expiry(CACHE_SHOP_KEY, 1, loader(&source), TTL)
        .await
        .unwrap();
    assert_eq!(refreshed, Some(Shop::new(1, "Z")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_logical_admits_one_rebuild_per_expiry() {
    let harness = Arc::new(TestCache::new());
    let source = ShopSource::with_shop(Duration::from_millis(50), Shop::new(1, "Z"));
    seed_expired(&harness, &Shop::new(1, "Y")).await;

    let mut handles = Vec::new();
    for _ in 0..32 {
        let harness = harness.clone();
        let source = source.clone();
        handles.push(tokio::spawn(async move {
            harness
                .cache
                .query_with_logical_expiry(CACHE_SHOP_KEY, 1, loader(&source), TTL)
                .await
        }));
    }

    for handle in handles {
        let shop = handle.await.unwrap().unwrap().unwrap();
        assert!(shop.name == "Y" || shop.name == "Z");
    }

    assert!(harness.executor.drain(Duration::from_secs(2)).await);
    assert_eq!(source.calls(), 1);
    assert_eq!(harness.store.get(&shop_lock(1)).await.unwrap(), None);
}

#[tokio::test]
async fn test_logical_rebuild_failure_keeps_stale_value() {
    let harness = TestCache::new();
    let source = ShopSource::with_shop(Duration::ZERO, Shop::new(1, "Z"));
    source.set_failing(true);
    seed_expired(&harness, &Shop::new(1, "Y")).await;

    let stale = harness
        .cache
        .query_with_logical_expiry(CACHE_SHOP_KEY, 1, loader(&source), TTL)
        .await
        .unwrap();
    assert_eq!(stale, Some(Shop::new(1, "Y")));
    assert!(harness.executor.drain(Duration::from_secs(1)).await);
    assert_eq!(harness.executor.stats().failed, 1);
    assert_eq!(harness.store.get(&shop_lock(1)).await.unwrap(), None);

    source.set_failing(false);
    harness
        .cache
        .query_with_logical_expiry(CACHE_SHOP_KEY, 1, loader(&source), TTL)
        .await
        .unwrap();
    assert!(harness.executor.drain(Duration::from_secs(1)).await);

    let refreshed = harness
        .cache
        .query_with_logical_expiry(CACHE_SHOP_KEY, 1, loader(&source), TTL)
        .await
        .unwrap();
    assert_eq!(refreshed, Some(Shop::new(1, "Z")));
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn test_logical_rebuild_drops_entry_removed_from_source() {
    let harness = TestCache::new();
    let source = ShopSource::new(Duration::ZERO);
    seed_expired(&harness, &Shop::new(1, "Y")).await;

    let stale = harness
        .cache
        .query_with_logical_expiry(CACHE_SHOP_KEY, 1, loader(&source), TTL)
        .await
        .unwrap();
    assert_eq!(stale, Some(Shop::new(1, "Y")));
    assert!(harness.executor.drain(Duration::from_secs(1)).await);

    assert_eq!(harness.store.get(&shop_key(1)).await.unwrap(), None);
}

#[tokio::test]
async fn test_logical_rejected_rebuild_serves_stale_and_releases_lock() {
    let harness = TestCache::with(
        fast_options(),
        RebuildExecutorConfig {
            concurrency: 1,
            queue_capacity: 0,
            ..RebuildExecutorConfig::default()
        },
    );
    let source = ShopSource::with_shop(Duration::ZERO, Shop::new(1, "Z"));
    seed_expired(&harness, &Shop::new(1, "Y")).await;

    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    harness
        .executor
        .submit(RebuildTask::new("busy", async move {
            let _ = release_rx.await;
            Ok(())
        }))
        .unwrap();

    let stale = harness
        .cache
        .query_with_logical_expiry(CACHE_SHOP_KEY, 1, loader(&source), TTL)
        .await
        .unwrap();
    assert_eq!(stale, Some(Shop::new(1, "Y")));
    assert_eq!(harness.executor.stats().rejected, 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.store.get(&shop_lock(1)).await.unwrap(), None);
    assert_eq!(source.calls(), 0);

    let _ = release_tx.send(());
    assert!(harness.executor.drain(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_plain_value_through_logical_path_is_decode_error() {
    let harness = TestCache::new();
    let source = ShopSource::new(Duration::ZERO);
    harness.cache.set(&shop_key(1), &Shop::new(1, "plain"), TTL).await.unwrap();

    let result = harness
        .cache
        .query_with_logical_expiry(CACHE_SHOP_KEY, 1, loader(&source), TTL)
        .await;

    assert!(matches!(result, Err(LarderError::Decode { .. })));
}

#[tokio::test]
async fn test_set_with_logical_expiry_latest_write_wins() {
    let harness = TestCache::new();
    let shop = Shop::new(1, "Y");

    harness
        .cache
        .set_with_logical_expiry(&shop_key(1), &shop, Duration::from_secs(10))
        .await
        .unwrap();
    harness
        .cache
        .set_with_logical_expiry(&shop_key(1), &shop, Duration::from_secs(60))
        .await
        .unwrap();

    let raw = harness.store.get(&shop_key(1)).await.unwrap().unwrap();
    let entry: LogicalEntry<Shop> = serde_json::from_str(&raw).unwrap();
    assert_eq!(entry.data, shop);
    assert!(entry.logical_expire_at > chrono::Utc::now() + chrono::Duration::seconds(50));
    assert_eq!(harness.store.ttl(&shop_key(1)), None);
}

#[tokio::test]
async fn test_warm_up_skips_missing_record() {
    let harness = TestCache::new();
    let source = ShopSource::new(Duration::ZERO);

    let warmed = harness
        .cache
        .warm_up(CACHE_SHOP_KEY, 9, loader(&source), TTL)
        .await
        .unwrap();

    assert!(!warmed);
    assert_eq!(harness.store.get(&shop_key(9)).await.unwrap(), None);
}
