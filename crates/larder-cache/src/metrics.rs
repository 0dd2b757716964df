//! Metrics for cache and rebuild monitoring.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names for the cache layer.
pub mod names {
    /// Cache reads that returned a stored payload.
    pub const CACHE_HITS_TOTAL: &str = "larder_cache_hits_total";
    /// Cache reads that found nothing stored.
    pub const CACHE_MISSES_TOTAL: &str = "larder_cache_misses_total";
    /// Cache reads answered by the null marker.
    pub const CACHE_NULL_HITS_TOTAL: &str = "larder_cache_null_hits_total";
    /// Logical entries served past their expiry.
    pub const CACHE_STALE_HITS_TOTAL: &str = "larder_cache_stale_hits_total";
    /// Source lookups performed by the cache.
    pub const CACHE_LOADS_TOTAL: &str = "larder_cache_loads_total";
    /// Source lookup duration in seconds.
    pub const CACHE_LOAD_DURATION_SECONDS: &str = "larder_cache_load_duration_seconds";
    /// Mutex reads that gave up after exhausting their attempts.
    pub const CACHE_UNAVAILABLE_TOTAL: &str = "larder_cache_unavailable_total";

    /// Lock acquisition attempts.
    pub const LOCK_ATTEMPTS_TOTAL: &str = "larder_lock_attempts_total";
    /// Lock releases that failed at the store.
    pub const LOCK_RELEASE_FAILURES_TOTAL: &str = "larder_lock_release_failures_total";

    /// Rebuild tasks accepted by the executor.
    pub const REBUILD_SUBMITTED_TOTAL: &str = "larder_rebuild_submitted_total";
    /// Rebuild tasks rejected because the executor was full or stopped.
    pub const REBUILD_REJECTED_TOTAL: &str = "larder_rebuild_rejected_total";
    /// Rebuild tasks that completed successfully.
    pub const REBUILD_COMPLETED_TOTAL: &str = "larder_rebuild_completed_total";
    /// Rebuild tasks that failed or panicked.
    pub const REBUILD_FAILED_TOTAL: &str = "larder_rebuild_failed_total";
    /// Rebuild tasks cut off by the task timeout.
    pub const REBUILD_TIMED_OUT_TOTAL: &str = "larder_rebuild_timed_out_total";
    /// Rebuild task duration in seconds.
    pub const REBUILD_DURATION_SECONDS: &str = "larder_rebuild_duration_seconds";
    /// Rebuild tasks running or queued.
    pub const REBUILD_IN_FLIGHT: &str = "larder_rebuild_in_flight";
    /// In-flight rebuild tasks as a fraction of executor capacity.
    pub const REBUILD_SATURATION: &str = "larder_rebuild_saturation";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Cache reads
    describe_counter!(names::CACHE_HITS_TOTAL, "Total number of cache hits");
    describe_counter!(names::CACHE_MISSES_TOTAL, "Total number of cache misses");
    describe_counter!(
        names::CACHE_NULL_HITS_TOTAL,
        "Total number of reads answered by the null marker"
    );
    describe_counter!(
        names::CACHE_STALE_HITS_TOTAL,
        "Total number of logically expired entries served"
    );
    describe_counter!(names::CACHE_LOADS_TOTAL, "Total number of source lookups");
    describe_histogram!(
        names::CACHE_LOAD_DURATION_SECONDS,
        "Source lookup duration in seconds"
    );
    describe_counter!(
        names::CACHE_UNAVAILABLE_TOTAL,
        "Total number of mutex reads that exhausted their attempts"
    );

    // Locks
    describe_counter!(names::LOCK_ATTEMPTS_TOTAL, "Total number of lock acquisition attempts");
    describe_counter!(
        names::LOCK_RELEASE_FAILURES_TOTAL,
        "Total number of failed lock releases"
    );

    // Rebuild executor
    describe_counter!(names::REBUILD_SUBMITTED_TOTAL, "Total number of rebuild tasks accepted");
    describe_counter!(names::REBUILD_REJECTED_TOTAL, "Total number of rebuild tasks rejected");
    describe_counter!(
        names::REBUILD_COMPLETED_TOTAL,
        "Total number of rebuild tasks completed successfully"
    );
    describe_counter!(names::REBUILD_FAILED_TOTAL, "Total number of rebuild tasks that failed");
    describe_counter!(
        names::REBUILD_TIMED_OUT_TOTAL,
        "Total number of rebuild tasks that timed out"
    );
    describe_histogram!(
        names::REBUILD_DURATION_SECONDS,
        "Rebuild task duration in seconds"
    );
    describe_gauge!(names::REBUILD_IN_FLIGHT, "Rebuild tasks running or queued");
    describe_gauge!(
        names::REBUILD_SATURATION,
        "Rebuild tasks in flight divided by executor capacity"
    );
}

/// Cache read metrics recorder.
#[derive(Clone)]
pub struct CacheMetrics;

impl CacheMetrics {
    /// Record a hit.
    pub fn hit(strategy: &'static str) {
        counter!(names::CACHE_HITS_TOTAL, "strategy" => strategy).increment(1);
    }

    /// Record a miss.
    pub fn miss(strategy: &'static str) {
        counter!(names::CACHE_MISSES_TOTAL, "strategy" => strategy).increment(1);
    }

    /// Record a read answered by the null marker.
    pub fn null_hit(strategy: &'static str) {
        counter!(names::CACHE_NULL_HITS_TOTAL, "strategy" => strategy).increment(1);
    }

    /// Record a stale logical entry being served.
    pub fn stale_hit() {
        counter!(names::CACHE_STALE_HITS_TOTAL).increment(1);
    }

    /// Record a source lookup.
    pub fn load(strategy: &'static str, found: bool, duration: Duration) {
        let outcome = if found { "found" } else { "absent" };
        counter!(
            names::CACHE_LOADS_TOTAL,
            "strategy" => strategy,
            "outcome" => outcome
        )
        .increment(1);

        histogram!(names::CACHE_LOAD_DURATION_SECONDS, "strategy" => strategy)
            .record(duration.as_secs_f64());
    }

    /// Record a failed source lookup.
    pub fn load_failed(strategy: &'static str) {
        counter!(
            names::CACHE_LOADS_TOTAL,
            "strategy" => strategy,
            "outcome" => "error"
        )
        .increment(1);
    }

    /// Record a mutex read that gave up.
    pub fn unavailable() {
        counter!(names::CACHE_UNAVAILABLE_TOTAL).increment(1);
    }
}

/// Lock metrics recorder.
#[derive(Clone)]
pub struct LockMetrics;

impl LockMetrics {
    /// Record an acquisition attempt.
    pub fn attempt(acquired: bool) {
        let outcome = if acquired { "acquired" } else { "contended" };
        counter!(names::LOCK_ATTEMPTS_TOTAL, "outcome" => outcome).increment(1);
    }

    /// Record a failed release.
    pub fn release_failed() {
        counter!(names::LOCK_RELEASE_FAILURES_TOTAL).increment(1);
    }
}

/// Rebuild executor metrics recorder.
#[derive(Clone)]
pub struct RebuildMetrics;

impl RebuildMetrics {
    /// Record an accepted task.
    pub fn submitted() {
        counter!(names::REBUILD_SUBMITTED_TOTAL).increment(1);
    }

    /// Record a rejected task.
    pub fn rejected(reason: &'static str) {
        counter!(names::REBUILD_REJECTED_TOTAL, "reason" => reason).increment(1);
    }

    /// Record a completed task.
    pub fn completed(duration: Duration) {
        counter!(names::REBUILD_COMPLETED_TOTAL).increment(1);
        histogram!(names::REBUILD_DURATION_SECONDS, "status" => "completed")
            .record(duration.as_secs_f64());
    }

    /// Record a failed task.
    pub fn failed(duration: Duration) {
        counter!(names::REBUILD_FAILED_TOTAL).increment(1);
        histogram!(names::REBUILD_DURATION_SECONDS, "status" => "failed")
            .record(duration.as_secs_f64());
    }

    /// Record a timed out task.
    pub fn timed_out() {
        counter!(names::REBUILD_TIMED_OUT_TOTAL).increment(1);
    }

    /// Set executor occupancy gauges.
    pub fn set_in_flight(in_flight: usize, capacity: usize) {
        gauge!(names::REBUILD_IN_FLIGHT).set(in_flight as f64);
        let saturation = if capacity == 0 {
            1.0
        } else {
            in_flight as f64 / capacity as f64
        };
        gauge!(names::REBUILD_SATURATION).set(saturation);
    }
}
