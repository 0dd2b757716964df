//! In-process store with per-key TTL.
//!
//! Behaves like a single Redis node for the commands the cache layer uses.
//! Expired keys are dropped lazily on access; `purge_expired` reclaims the rest.

use super::KeyValueStore;
use async_trait::async_trait;
use larder_core::{LarderError, LarderResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn wrong_type(key: &str) -> LarderError {
    LarderError::store(format!(
        "WRONGTYPE Operation against key '{}' holding the wrong kind of value",
        key
    ))
}

/// In-memory key-value store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<String, Slot>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots.lock().values().filter(|slot| !slot.is_expired(now)).count()
    }

    /// Whether the store holds no live keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining TTL of a key; `None` for missing keys or keys without TTL.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let slots = self.slots.lock();
        let slot = slots.get(key).filter(|slot| !slot.is_expired(now))?;
        slot.expires_at.map(|at| at.saturating_duration_since(now))
    }

    /// Drop every expired key, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| !slot.is_expired(now));
        before - slots.len()
    }

    /// Live slot for `key`, evicting it first if it has expired.
    fn live<'a>(slots: &'a mut HashMap<String, Slot>, key: &str, now: Instant) -> Option<&'a mut Slot> {
        if slots.get(key).is_some_and(|slot| slot.is_expired(now)) {
            slots.remove(key);
        }
        slots.get_mut(key)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> LarderResult<Option<String>> {
        let mut slots = self.slots.lock();
        match Self::live(&mut slots, key, Instant::now()) {
            Some(Slot { value: Value::Str(s), .. }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> LarderResult<()> {
        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        self.slots.lock().insert(
            key.to_string(),
            Slot {
                value: Value::Str(value.to_string()),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> LarderResult<bool> {
        let mut slots = self.slots.lock();
        let existed = Self::live(&mut slots, key, Instant::now()).is_some();
        slots.remove(key);
        Ok(existed)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> LarderResult<bool> {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        match Self::live(&mut slots, key, now) {
            Some(slot) => {
                slot.expires_at = now.checked_add(ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> LarderResult<bool> {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        if Self::live(&mut slots, key, now).is_some() {
            return Ok(false);
        }

        slots.insert(
            key.to_string(),
            Slot {
                value: Value::Str(value.to_string()),
                expires_at: now.checked_add(ttl),
            },
        );
        Ok(true)
    }

    async fn hash_put_all(&self, key: &str, fields: &HashMap<String, String>) -> LarderResult<()> {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        match Self::live(&mut slots, key, now) {
            Some(Slot { value: Value::Hash(hash), .. }) => {
                hash.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Some(_) => return Err(wrong_type(key)),
            None => {
                if !fields.is_empty() {
                    slots.insert(
                        key.to_string(),
                        Slot {
                            value: Value::Hash(fields.clone()),
                            expires_at: None,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> LarderResult<HashMap<String, String>> {
        let mut slots = self.slots.lock();
        match Self::live(&mut slots, key, Instant::now()) {
            Some(Slot { value: Value::Hash(hash), .. }) => Ok(hash.clone()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(HashMap::new()),
        }
    }
}
