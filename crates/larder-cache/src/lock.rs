//! Lease-based distributed lock over the store's conditional set.
//!
//! The lock key existing in the store *is* the lease. A crashed holder never
//! releases; the store TTL frees the key after `ttl` instead.

use crate::metrics::LockMetrics;
use crate::store::KeyValueStore;
use larder_core::LarderResult;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Short-lived mutual exclusion lease per key.
///
/// Clones share the holder token, so one logical owner can release from a
/// background task.
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn KeyValueStore>,
    holder: String,
}

impl DistributedLock {
    /// Create a lock handle with a fresh holder token.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            holder: format!("larder-{}", Uuid::new_v4()),
        }
    }

    /// Holder token written as the lock value.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Try once to install the lease on `key` for `ttl`.
    ///
    /// Returns `true` iff this call created the lease. Losers fail
    /// immediately; there is no queueing.
    pub async fn try_acquire(&self, key: &str, ttl: Duration) -> LarderResult<bool> {
        let acquired = self.store.set_if_absent(key, &self.holder, ttl).await?;
        LockMetrics::attempt(acquired);
        debug!(lock_key = %key, acquired, "Lock acquisition attempt");
        Ok(acquired)
    }

    /// Delete the lease on `key`.
    ///
    /// The delete is unconditional: it does not check who holds the lease.
    pub async fn release(&self, key: &str) -> LarderResult<()> {
        self.store.delete(key).await?;
        debug!(lock_key = %key, "Lock released");
        Ok(())
    }

    /// Release, logging instead of returning store failures.
    ///
    /// The lease still expires on its own if the delete fails.
    pub async fn release_quietly(&self, key: &str) {
        if let Err(e) = self.release(key).await {
            LockMetrics::release_failed();
            warn!(lock_key = %key, error = %e, "Failed to release lock; lease will expire");
        }
    }
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("holder", &self.holder)
            .finish()
    }
}
