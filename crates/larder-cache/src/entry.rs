//! Stored entry encoding.
//!
//! Two encodings share the store:
//!
//! - **plain**: the payload serialized as JSON, written with a storage TTL;
//! - **logical**: `{"data": <payload>, "logicalExpireAt": <RFC 3339>}`, written
//!   without a storage TTL.
//!
//! Neither carries a discriminator. A key written through one encoding must
//! only be read through the matching strategy. Reading a plain value through
//! the logical path fails with a decode error (the timestamp is missing), but a
//! logical entry read as a plain value silently succeeds for payload types that
//! ignore unknown fields.
//!
//! The empty string is reserved as the null marker: a cached "confirmed
//! absent" answer. Payloads never encode to an empty string.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use larder_core::{LarderError, LarderResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Value stored to remember that the source has no record for a key.
pub const NULL_MARKER: &str = "";

/// Outcome of a raw store read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// A stored payload.
    Value(String),
    /// The null marker: the source confirmed absence.
    NullMarker,
    /// Nothing cached.
    Missing,
}

impl Lookup {
    /// Classify a raw store read. Blank strings count as the null marker.
    #[must_use]
    pub fn from_raw(raw: Option<String>) -> Self {
        match raw {
            None => Self::Missing,
            Some(s) if s.trim().is_empty() => Self::NullMarker,
            Some(s) => Self::Value(s),
        }
    }
}

/// Encode a payload with the plain encoding.
pub fn encode<V: Serialize + ?Sized>(value: &V) -> LarderResult<String> {
    serde_json::to_string(value).map_err(|e| LarderError::Encode(e.to_string()))
}

/// Decode a payload stored under `key`.
pub fn decode<V: DeserializeOwned>(key: &str, raw: &str) -> LarderResult<V> {
    serde_json::from_str(raw).map_err(|e| LarderError::decode(key, e.to_string()))
}

/// Payload wrapped with a logical expiry timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalEntry<V> {
    /// Cached payload.
    pub data: V,
    /// Instant after which the payload is stale.
    pub logical_expire_at: DateTime<Utc>,
}

impl<V> LogicalEntry<V> {
    /// Wrap `data` so that it stays fresh for `ttl` from now.
    #[must_use]
    pub fn new(data: V, ttl: Duration) -> Self {
        let now = Utc::now();
        let expire_at = ChronoDuration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::expiring_at(data, expire_at)
    }

    /// Wrap `data` with an explicit expiry instant.
    #[must_use]
    pub fn expiring_at(data: V, logical_expire_at: DateTime<Utc>) -> Self {
        Self {
            data,
            logical_expire_at,
        }
    }

    /// Whether the entry is still fresh at `now`.
    #[must_use]
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.logical_expire_at
    }

    /// Whether the entry is still fresh.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }
}
