//! Application configuration structures.

use larder_core::TelemetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the cache layer.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LarderConfig {
    /// Application name and metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// Redis configuration.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Read-through cache tunables.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Rebuild lock configuration.
    #[serde(default)]
    pub lock: LockConfig,

    /// Background rebuild pool configuration.
    #[serde(default)]
    pub rebuild: RebuildConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppMetadata {
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
    /// Environment (development, staging, production).
    pub environment: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "larder".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Redis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis URL.
    pub url: String,
    /// Connection pool size.
    pub pool_size: u32,
    /// Use Redis; when disabled the in-process store is used instead.
    pub enabled: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            enabled: true,
        }
    }
}

/// Read-through cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied to cached values when the caller has no opinion.
    pub default_ttl_secs: u64,
    /// TTL of the empty-string marker that remembers a confirmed miss.
    pub null_ttl_secs: u64,
    /// Upper bound of the random TTL extension, as a fraction of the TTL.
    pub jitter_ratio: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 1800, // 30 minutes
            null_ttl_secs: 120,     // 2 minutes
            jitter_ratio: 0.1,
        }
    }
}

impl CacheConfig {
    /// Returns the default TTL as a Duration.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Returns the null-marker TTL as a Duration.
    #[must_use]
    pub const fn null_ttl(&self) -> Duration {
        Duration::from_secs(self.null_ttl_secs)
    }
}

/// Rebuild lock configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Prefix prepended to the cache key to form the lock key.
    pub key_prefix: String,
    /// Lease duration in seconds.
    pub ttl_secs: u64,
    /// Sleep between mutex retries in milliseconds.
    pub retry_backoff_ms: u64,
    /// Attempts before a mutex query gives up.
    pub max_attempts: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            key_prefix: "lock:".to_string(),
            ttl_secs: 10,
            retry_backoff_ms: 50,
            max_attempts: 100,
        }
    }
}

impl LockConfig {
    /// Returns the lease duration as a Duration.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Returns the retry backoff as a Duration.
    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Background rebuild pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RebuildConfig {
    /// Rebuilds allowed to run at once.
    pub concurrency: usize,
    /// Rebuilds allowed to wait for a free slot.
    pub queue_capacity: usize,
    /// Per-rebuild timeout in milliseconds; must stay below the lock TTL.
    pub task_timeout_ms: u64,
    /// Shutdown drain timeout in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            queue_capacity: 256,
            task_timeout_ms: 8000,
            shutdown_timeout_secs: 30,
        }
    }
}

impl RebuildConfig {
    /// Returns the task timeout as a Duration.
    #[must_use]
    pub const fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    /// Returns the shutdown timeout as a Duration.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log format (json, pretty).
    pub log_format: String,
    /// Enable metrics.
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
        }
    }
}

impl ObservabilityConfig {
    /// Builds the telemetry settings for `larder_core::init_telemetry`.
    #[must_use]
    pub fn telemetry(&self, service_name: &str) -> TelemetryConfig {
        TelemetryConfig {
            service_name: service_name.to_string(),
            log_level: self.log_level.clone(),
            json: self.log_format == "json",
            console_output: true,
        }
    }
}
