//! Unified error types for the cache orchestration layer.

use std::fmt::Debug;
use thiserror::Error;

/// Unified error type for Larder.
///
/// "Not found" is deliberately absent: a key that the source confirmed missing
/// is a successful `Ok(None)` result, never an error.
#[derive(Error, Debug)]
pub enum LarderError {
    // ============ Codec Errors ============
    /// Stored payload does not match the expected shape.
    #[error("Cache decode error for key '{key}': {message}")]
    Decode { key: String, message: String },

    /// Payload could not be serialized.
    #[error("Cache encode error: {0}")]
    Encode(String),

    // ============ Infrastructure Errors ============
    /// Key-value store unavailable or rejected a command.
    #[error("Store error: {0}")]
    Store(String),

    /// Slow-path data source failed.
    #[error("Loader error: {0}")]
    Loader(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ============ Coordination Errors ============
    /// Mutex-gated rebuild did not complete within the retry budget.
    #[error("Temporarily unavailable: key '{key}' still rebuilding after {attempts} attempts")]
    Unavailable { key: String, attempts: u32 },

    /// Background rebuild could not be scheduled.
    #[error("Rebuild rejected: {0}")]
    RebuildRejected(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    // ============ Internal Errors ============
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LarderError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Decode { .. } => "DECODE_ERROR",
            Self::Encode(_) => "ENCODE_ERROR",
            Self::Store(_) => "STORE_ERROR",
            Self::Loader(_) => "LOADER_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Unavailable { .. } => "TEMPORARILY_UNAVAILABLE",
            Self::RebuildRejected(_) => "REBUILD_REJECTED",
            Self::Timeout(_) => "TIMEOUT",
            Self::Internal(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Creates a decode error for a key.
    #[must_use]
    pub fn decode<K: Into<String>, M: ToString>(key: K, message: M) -> Self {
        Self::Decode {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Creates a store error.
    #[must_use]
    pub fn store<T: Into<String>>(message: T) -> Self {
        Self::Store(message.into())
    }

    /// Creates a loader error.
    #[must_use]
    pub fn loader<T: Into<String>>(message: T) -> Self {
        Self::Loader(message.into())
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout<T: Into<String>>(message: T) -> Self {
        Self::Timeout(message.into())
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal(message.into())
    }

    /// Checks if this error is retriable.
    ///
    /// Decode errors are never retriable: a corrupt payload stays corrupt.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Store(_)
                | Self::Loader(_)
                | Self::Unavailable { .. }
                | Self::RebuildRejected(_)
                | Self::Timeout(_)
        )
    }
}
