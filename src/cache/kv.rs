//! Key/value cache contract shared by the telemetry cache and the registry.
//!
//! Values are JSON documents so that any external key/value backend can hold
//! them. Entries may carry a TTL; an expired entry reads as a miss.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Errors surfaced by a cache backend.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("malformed cache entry {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode cache entry {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Asynchronous key/value cache with optional per-entry TTL.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a value. A missing or expired key is `Ok(None)`.
    async fn get(&self, key: &str) -> Result<Option<JsonValue>, CacheError>;

    /// Store a value, replacing any previous one.
    async fn set(&self, key: &str, value: JsonValue, ttl: Option<Duration>)
        -> Result<(), CacheError>;
}

struct Entry {
    value: JsonValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Process-local [`KvStore`].
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>, CacheError> {
        self.entries
            .lock()
            .map_err(|_| CacheError::Backend("memory cache lock poisoned".to_string()))
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<JsonValue>, CacheError> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: JsonValue,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        // A TTL past the clock's range never expires.
        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        self.lock()?
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }
}

/// Read and decode a typed value, falling back to `T::default()` on a miss.
pub(crate) async fn get_or_default<T>(kv: &dyn KvStore, key: &str) -> Result<T, CacheError>
where
    T: serde::de::DeserializeOwned + Default,
{
    match kv.get(key).await? {
        Some(value) => serde_json::from_value(value).map_err(|source| CacheError::Decode {
            key: key.to_string(),
            source,
        }),
        None => Ok(T::default()),
    }
}

/// Encode and store a typed value.
pub(crate) async fn put<T>(
    kv: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), CacheError>
where
    T: serde::Serialize,
{
    let json = serde_json::to_value(value).map_err(|source| CacheError::Encode {
        key: key.to_string(),
        source,
    })?;
    kv.set(key, json, ttl).await
}
