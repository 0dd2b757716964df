//! # Larder Cache
//!
//! Read-through cache orchestration in front of a key-value store and a slow
//! data source. Guards against the three classic failure modes:
//!
//! - **penetration**: confirmed misses are cached as a null marker;
//! - **breakdown**: hot keys rebuild behind a per-key lease, either blocking
//!   (mutex strategy) or in the background (logical expiry);
//! - **avalanche**: TTLs get a small random extension.
//!
//! ## Example
//!
//! ```rust,ignore
//! use larder_cache::{keys, CacheStack};
//!
//! let stack = CacheStack::from_config(&config).await?;
//! let shop: Option<Shop> = stack
//!     .cache()
//!     .query_with_mutex(keys::CACHE_SHOP_KEY, 1, |id| repo.find_shop(id), ttl)
//!     .await?;
//! ```

pub mod client;
pub mod di;
pub mod entry;
pub mod keys;
pub mod lock;
pub mod metrics;
pub mod rebuild;
pub mod stack;
pub mod store;

pub use client::{CacheOptions, ReadThroughCache};
pub use di::{build_cache_module, resolve_store, CacheModule};
pub use entry::{LogicalEntry, Lookup, NULL_MARKER};
pub use lock::DistributedLock;
pub use metrics::register_metrics;
pub use rebuild::{RebuildExecutor, RebuildExecutorConfig, RebuildExecutorStats, RebuildTask};
pub use stack::CacheStack;
pub use store::{KeyValueStore, MemoryStore, RedisStore};
