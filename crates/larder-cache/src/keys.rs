//! Cache key builders for consistent key naming.
//!
//! Keys are plain concatenations; callers keep prefixes disjoint per entity type.

use std::fmt::Display;

/// Prefix of cached shop records.
pub const CACHE_SHOP_KEY: &str = "cache:shop:";
/// Prefix of rebuild locks.
pub const DEFAULT_LOCK_PREFIX: &str = "lock:";

/// Build the cache key for an identifier under a prefix.
#[must_use]
pub fn cache_key(prefix: &str, id: impl Display) -> String {
    format!("{}{}", prefix, id)
}

/// Build the lock key guarding a cache key.
#[must_use]
pub fn lock_key(lock_prefix: &str, cache_key: &str) -> String {
    format!("{}{}", lock_prefix, cache_key)
}
