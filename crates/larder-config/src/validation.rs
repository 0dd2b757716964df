//! Configuration validation module.
//!
//! Provides validation for all configuration values, failing fast on invalid
//! configuration rather than at runtime.

use crate::LarderConfig;
use std::fmt;
use url::Url;

/// Configuration validation error variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    /// URL format is invalid.
    InvalidUrl { url_type: String, message: String },
    /// Pool size is zero.
    EmptyPool,
    /// Pool size exceeds maximum allowed.
    PoolSizeTooLarge { value: u32, maximum: u32 },
    /// Jitter ratio outside the allowed band.
    InvalidJitterRatio { value: f64, maximum: f64 },
    /// Duration value must be positive.
    NonPositiveDuration { name: String },
    /// Retry budget must allow at least one attempt.
    ZeroAttempts,
    /// Rebuild pool needs at least one worker.
    ZeroConcurrency,
    /// Rebuild timeout must be strictly shorter than the lock lease.
    RebuildOutlivesLock { timeout_ms: u64, lock_ttl_ms: u64 },
    /// Log level is invalid.
    InvalidLogLevel { value: String },
    /// Log format is invalid.
    InvalidLogFormat { value: String },
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl { url_type, message } => {
                write!(f, "Invalid {} URL: {}", url_type, message)
            }
            Self::EmptyPool => write!(f, "Redis pool size must be at least 1"),
            Self::PoolSizeTooLarge { value, maximum } => {
                write!(f, "Pool size {} exceeds maximum allowed ({})", value, maximum)
            }
            Self::InvalidJitterRatio { value, maximum } => {
                write!(
                    f,
                    "Invalid jitter ratio: {} (must be between 0.0 and {})",
                    value, maximum
                )
            }
            Self::NonPositiveDuration { name } => {
                write!(f, "Duration '{}' must be positive", name)
            }
            Self::ZeroAttempts => write!(f, "lock.max_attempts must be at least 1"),
            Self::ZeroConcurrency => write!(f, "rebuild.concurrency must be at least 1"),
            Self::RebuildOutlivesLock { timeout_ms, lock_ttl_ms } => {
                write!(
                    f,
                    "Rebuild timeout ({}ms) must be shorter than the lock TTL ({}ms)",
                    timeout_ms, lock_ttl_ms
                )
            }
            Self::InvalidLogLevel { value } => {
                write!(
                    f,
                    "Invalid log level: '{}' (valid: trace, debug, info, warn, error)",
                    value
                )
            }
            Self::InvalidLogFormat { value } => {
                write!(f, "Invalid log format: '{}' (valid: pretty, json)", value)
            }
        }
    }
}

impl std::error::Error for ConfigValidationError {}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Maximum connection pool size.
    const MAX_POOL_SIZE: u32 = 1000;
    /// Jitter beyond this fraction of the TTL stops being "small".
    const MAX_JITTER_RATIO: f64 = 0.1;
    /// Valid log levels.
    const VALID_LOG_LEVELS: &'static [&'static str] = &["trace", "debug", "info", "warn", "error"];
    /// Valid log formats.
    const VALID_LOG_FORMATS: &'static [&'static str] = &["pretty", "json"];

    /// Validates the entire configuration.
    ///
    /// Returns Ok(()) if valid, or Err with all validation errors found.
    pub fn validate(config: &LarderConfig) -> Result<(), Vec<ConfigValidationError>> {
        let mut errors = Vec::new();

        Self::validate_redis(config, &mut errors);
        Self::validate_cache(config, &mut errors);
        Self::validate_lock_and_rebuild(config, &mut errors);
        Self::validate_observability(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_redis(config: &LarderConfig, errors: &mut Vec<ConfigValidationError>) {
        let redis = &config.redis;
        if !redis.enabled {
            return;
        }

        match Url::parse(&redis.url) {
            Ok(url) if url.scheme() == "redis" || url.scheme() == "rediss" => {}
            Ok(url) => errors.push(ConfigValidationError::InvalidUrl {
                url_type: "Redis".to_string(),
                message: format!("unsupported scheme '{}'", url.scheme()),
            }),
            Err(e) => errors.push(ConfigValidationError::InvalidUrl {
                url_type: "Redis".to_string(),
                message: e.to_string(),
            }),
        }

        if redis.pool_size == 0 {
            errors.push(ConfigValidationError::EmptyPool);
        } else if redis.pool_size > Self::MAX_POOL_SIZE {
            errors.push(ConfigValidationError::PoolSizeTooLarge {
                value: redis.pool_size,
                maximum: Self::MAX_POOL_SIZE,
            });
        }
    }

    fn validate_cache(config: &LarderConfig, errors: &mut Vec<ConfigValidationError>) {
        let cache = &config.cache;

        if !(0.0..=Self::MAX_JITTER_RATIO).contains(&cache.jitter_ratio) {
            errors.push(ConfigValidationError::InvalidJitterRatio {
                value: cache.jitter_ratio,
                maximum: Self::MAX_JITTER_RATIO,
            });
        }

        if cache.default_ttl_secs == 0 {
            errors.push(ConfigValidationError::NonPositiveDuration {
                name: "cache.default_ttl_secs".to_string(),
            });
        }
        if cache.null_ttl_secs == 0 {
            errors.push(ConfigValidationError::NonPositiveDuration {
                name: "cache.null_ttl_secs".to_string(),
            });
        }
    }

    fn validate_lock_and_rebuild(config: &LarderConfig, errors: &mut Vec<ConfigValidationError>) {
        let lock = &config.lock;
        let rebuild = &config.rebuild;

        if lock.ttl_secs == 0 {
            errors.push(ConfigValidationError::NonPositiveDuration {
                name: "lock.ttl_secs".to_string(),
            });
        }
        if lock.max_attempts == 0 {
            errors.push(ConfigValidationError::ZeroAttempts);
        }
        if rebuild.concurrency == 0 {
            errors.push(ConfigValidationError::ZeroConcurrency);
        }
        if rebuild.task_timeout_ms == 0 {
            errors.push(ConfigValidationError::NonPositiveDuration {
                name: "rebuild.task_timeout_ms".to_string(),
            });
        }

        let lock_ttl_ms = lock.ttl_secs.saturating_mul(1000);
        if lock.ttl_secs > 0 && rebuild.task_timeout_ms >= lock_ttl_ms {
            errors.push(ConfigValidationError::RebuildOutlivesLock {
                timeout_ms: rebuild.task_timeout_ms,
                lock_ttl_ms,
            });
        }
    }

    fn validate_observability(config: &LarderConfig, errors: &mut Vec<ConfigValidationError>) {
        let observability = &config.observability;

        if !Self::VALID_LOG_LEVELS.contains(&observability.log_level.to_lowercase().as_str()) {
            errors.push(ConfigValidationError::InvalidLogLevel {
                value: observability.log_level.clone(),
            });
        }
        if !Self::VALID_LOG_FORMATS.contains(&observability.log_format.as_str()) {
            errors.push(ConfigValidationError::InvalidLogFormat {
                value: observability.log_format.clone(),
            });
        }
    }
}

/// Formats validation errors into a single message.
#[must_use]
pub fn format_validation_errors(errors: &[ConfigValidationError]) -> String {
    let details: Vec<String> = errors.iter().map(ToString::to_string).collect();
    format!("Configuration validation failed: {}", details.join("; "))
}
