//! Bounded background pool for out-of-band cache rebuilds.
//!
//! The executor is an explicitly owned component: construct it once, share it
//! by `Arc`, and shut it down with the rest of the stack. Submission never
//! blocks the caller; when `concurrency` tasks are running and
//! `queue_capacity` more are waiting, new tasks are rejected.

use crate::metrics::RebuildMetrics;
use futures::FutureExt;
use larder_config::RebuildConfig;
use larder_core::{BoxFuture, LarderError, LarderResult};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Future run after a task settles, whatever the outcome.
pub type CleanupFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Rebuild executor configuration.
#[derive(Debug, Clone)]
pub struct RebuildExecutorConfig {
    /// Tasks running at once.
    pub concurrency: usize,

    /// Tasks allowed to wait for a worker slot.
    pub queue_capacity: usize,

    /// Per-task timeout. Keep it below the lock TTL.
    pub task_timeout: Duration,

    /// How long `shutdown` waits for in-flight tasks.
    pub shutdown_timeout: Duration,
}

impl Default for RebuildExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            queue_capacity: 256,
            task_timeout: Duration::from_secs(8),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&RebuildConfig> for RebuildExecutorConfig {
    fn from(config: &RebuildConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            queue_capacity: config.queue_capacity,
            task_timeout: config.task_timeout(),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }
}

impl RebuildExecutorConfig {
    /// Running plus waiting tasks the executor admits.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.concurrency.saturating_add(self.queue_capacity)
    }
}

/// A unit of rebuild work.
pub struct RebuildTask {
    key: String,
    work: BoxFuture<'static, ()>,
    cleanup: Option<CleanupFuture>,
}

impl RebuildTask {
    /// Create a task rebuilding `key`.
    pub fn new<F>(key: impl Into<String>, work: F) -> Self
    where
        F: Future<Output = LarderResult<()>> + Send + 'static,
    {
        Self {
            key: key.into(),
            work: Box::pin(work),
            cleanup: None,
        }
    }

    /// Attach a cleanup step, typically a lock release.
    ///
    /// It runs after success, failure, panic, timeout, or rejection.
    #[must_use]
    pub fn with_cleanup<F>(mut self, cleanup: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cleanup = Some(Box::pin(cleanup));
        self
    }

    /// Key being rebuilt.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for RebuildTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebuildTask")
            .field("key", &self.key)
            .field("has_cleanup", &self.cleanup.is_some())
            .finish()
    }
}

/// State shared with spawned tasks.
struct Shared {
    semaphore: Semaphore,
    in_flight: AtomicUsize,
    accepting: AtomicBool,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    rejected: AtomicU64,
}

/// Bounded worker pool for cache rebuilds.
pub struct RebuildExecutor {
    /// Unique executor ID.
    id: String,

    /// Executor configuration.
    config: RebuildExecutorConfig,

    shared: Arc<Shared>,
}

impl RebuildExecutor {
    /// Create a new executor.
    pub fn new(config: RebuildExecutorConfig) -> Self {
        let concurrency = config.concurrency.max(1);

        Self {
            id: format!("rebuild-executor-{}", Uuid::new_v4()),
            config: RebuildExecutorConfig {
                concurrency,
                ..config
            },
            shared: Arc::new(Shared {
                semaphore: Semaphore::new(concurrency),
                in_flight: AtomicUsize::new(0),
                accepting: AtomicBool::new(true),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                timed_out: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
            }),
        }
    }

    /// Submit a task without waiting.
    ///
    /// Must be called within a Tokio runtime. On rejection the task's cleanup
    /// is still spawned and `RebuildRejected` is returned.
    pub fn submit(&self, task: RebuildTask) -> LarderResult<()> {
        let RebuildTask { key, work, cleanup } = task;

        if !self.shared.accepting.load(Ordering::SeqCst) {
            return Err(self.reject(&key, cleanup, "shutdown"));
        }

        let capacity = self.config.capacity();
        let reserved = self
            .shared
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < capacity).then_some(n + 1)
            });
        let in_flight = match reserved {
            Ok(previous) => previous + 1,
            Err(_) => return Err(self.reject(&key, cleanup, "saturated")),
        };

        RebuildMetrics::submitted();
        RebuildMetrics::set_in_flight(in_flight, capacity);
        debug!(executor_id = %self.id, key = %key, in_flight, "Rebuild task accepted");

        // The deadline runs from submission: queue time counts against the
        // lock lease the task was submitted under.
        let runner = self.shared.clone();
        let bounded = timeout(self.config.task_timeout, async move {
            let _permit = runner.semaphore.acquire().await.ok();
            AssertUnwindSafe(work).catch_unwind().await
        });
        let submitted = Instant::now();
        let shared = self.shared.clone();
        let task_timeout = self.config.task_timeout;
        let span = tracing::info_span!("cache_rebuild", key = %key, executor_id = %self.id);

        tokio::spawn(
            async move {
                match bounded.await {
                    Ok(Ok(Ok(()))) => {
                        shared.completed.fetch_add(1, Ordering::Relaxed);
                        RebuildMetrics::completed(submitted.elapsed());
                        debug!("Rebuild completed");
                    }
                    Ok(Ok(Err(e))) => {
                        shared.failed.fetch_add(1, Ordering::Relaxed);
                        RebuildMetrics::failed(submitted.elapsed());
                        warn!(error = %e, "Rebuild failed");
                    }
                    Ok(Err(_)) => {
                        shared.failed.fetch_add(1, Ordering::Relaxed);
                        RebuildMetrics::failed(submitted.elapsed());
                        error!("Rebuild panicked");
                    }
                    Err(_) => {
                        shared.timed_out.fetch_add(1, Ordering::Relaxed);
                        RebuildMetrics::timed_out();
                        let e = LarderError::timeout(format!(
                            "rebuild exceeded {}ms since submission",
                            task_timeout.as_millis()
                        ));
                        warn!(error = %e, "Rebuild timed out");
                    }
                }

                if let Some(cleanup) = cleanup {
                    if AssertUnwindSafe(cleanup).catch_unwind().await.is_err() {
                        error!("Rebuild cleanup panicked");
                    }
                }

                let remaining = shared.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
                RebuildMetrics::set_in_flight(remaining, capacity);
            }
            .instrument(span),
        );

        Ok(())
    }

    fn reject(&self, key: &str, cleanup: Option<CleanupFuture>, reason: &'static str) -> LarderError {
        self.shared.rejected.fetch_add(1, Ordering::Relaxed);
        RebuildMetrics::rejected(reason);
        warn!(executor_id = %self.id, key = %key, reason, "Rebuild task rejected");

        if let Some(cleanup) = cleanup {
            tokio::spawn(cleanup);
        }

        LarderError::RebuildRejected(format!("{} ({})", key, reason))
    }

    /// Wait until no task is running or queued.
    ///
    /// Returns `false` if `wait` elapsed first.
    pub async fn drain(&self, wait: Duration) -> bool {
        let shared = self.shared.clone();
        timeout(wait, async move {
            while shared.in_flight.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }

    /// Stop accepting tasks and wait for in-flight ones.
    ///
    /// Returns `false` if tasks were still running at the shutdown timeout.
    pub async fn shutdown(&self) -> bool {
        info!(executor_id = %self.id, "Stopping rebuild executor...");
        self.shared.accepting.store(false, Ordering::SeqCst);

        let drained = self.drain(self.config.shutdown_timeout).await;
        if drained {
            info!(
                executor_id = %self.id,
                completed = self.shared.completed.load(Ordering::Relaxed),
                failed = self.shared.failed.load(Ordering::Relaxed),
                "Rebuild executor stopped"
            );
        } else {
            warn!(
                executor_id = %self.id,
                in_flight = self.shared.in_flight.load(Ordering::SeqCst),
                "Rebuild executor stopped with tasks still in flight"
            );
        }
        drained
    }

    /// Whether new tasks are accepted.
    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::SeqCst)
    }

    /// Get the executor ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the executor configuration.
    pub fn config(&self) -> &RebuildExecutorConfig {
        &self.config
    }

    /// Get executor statistics.
    pub fn stats(&self) -> RebuildExecutorStats {
        let concurrency = self.config.concurrency;
        RebuildExecutorStats {
            id: self.id.clone(),
            accepting: self.is_accepting(),
            concurrency,
            queue_capacity: self.config.queue_capacity,
            in_flight: self.shared.in_flight.load(Ordering::SeqCst),
            running: concurrency.saturating_sub(self.shared.semaphore.available_permits()),
            completed: self.shared.completed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            timed_out: self.shared.timed_out.load(Ordering::Relaxed),
            rejected: self.shared.rejected.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for RebuildExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebuildExecutor")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish()
    }
}

/// Rebuild executor statistics.
#[derive(Debug, Clone)]
pub struct RebuildExecutorStats {
    /// Executor ID.
    pub id: String,

    /// Accepting new tasks.
    pub accepting: bool,

    /// Configured concurrency.
    pub concurrency: usize,

    /// Configured queue capacity.
    pub queue_capacity: usize,

    /// Tasks running or waiting.
    pub in_flight: usize,

    /// Tasks holding a worker slot.
    pub running: usize,

    /// Tasks completed.
    pub completed: u64,

    /// Tasks failed or panicked.
    pub failed: u64,

    /// Tasks timed out.
    pub timed_out: u64,

    /// Tasks rejected.
    pub rejected: u64,
}

impl RebuildExecutorStats {
    /// In-flight tasks as a fraction of capacity.
    #[must_use]
    pub fn saturation(&self) -> f64 {
        let capacity = self.concurrency + self.queue_capacity;
        if capacity == 0 {
            return 1.0;
        }
        self.in_flight as f64 / capacity as f64
    }
}
