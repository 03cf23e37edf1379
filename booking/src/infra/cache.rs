//! Key/value cache with per-entry TTL.
//!
//! Values are JSON strings. A cache is an optimisation: the Redis
//! implementation logs backend failures and reports a miss instead of failing
//! the request.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Cache failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The backend could not be reached or rejected the command.
    #[error("Cache backend error: {0}")]
    Backend(String),

    /// A value could not be encoded or decoded.
    #[error("Cache serialization error: {0}")]
    Serialization(String),
}

/// Raw string cache.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Stored value, if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store a value for `ttl`.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Drop a key; missing keys are fine.
    async fn remove(&self, key: &str) -> Result<(), CacheError>;

    /// Whether a live value is stored under `key`.
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Connectivity probe for readiness checks.
    async fn is_healthy(&self) -> bool {
        true
    }
}

impl dyn Cache {
    /// Decode the JSON value under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serialization`] if the stored value does not
    /// decode as `T`, or the backend error.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        self.get(key)
            .await?
            .map(|raw| {
                serde_json::from_str(&raw).map_err(|e| CacheError::Serialization(e.to_string()))
            })
            .transpose()
    }

    /// Store `value` as JSON under `key` for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serialization`] if the value cannot be encoded,
    /// or the backend error.
    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let raw =
            serde_json::to_string(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.set(key, raw, ttl).await
    }
}

// ============================================================================
// Redis
// ============================================================================

/// Redis cache; keys are stored with `PX` expiry.
#[derive(Clone)]
pub struct RedisCache {
    conn_manager: ConnectionManager,
    prefix: String,
}

impl RedisCache {
    /// Cache on an existing connection, namespacing keys under `prefix:`.
    #[must_use]
    pub fn new(conn_manager: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn_manager,
            prefix: prefix.into(),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn_manager.clone();
        let result: redis::RedisResult<Option<String>> = conn.get(self.key(key)).await;
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn_manager.clone();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let result: redis::RedisResult<()> = redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await;
        if let Err(e) = result {
            tracing::warn!(key = %key, error = %e, "Cache write failed");
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .del(self.key(key))
            .await
            .map_err(|e| CacheError::Backend(format!("Failed to delete cache key: {e}")))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn_manager.clone();
        conn.exists(self.key(key))
            .await
            .map_err(|e| CacheError::Backend(format!("Failed to check cache key: {e}")))
    }

    async fn is_healthy(&self) -> bool {
        let mut conn = self.conn_manager.clone();
        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        pong.is_ok()
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-local cache; expired entries are dropped on access.
#[derive(Clone, Default)]
pub struct InMemoryCache {
    entries: Arc<Mutex<HashMap<String, (String, Instant)>>>,
}

impl InMemoryCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, (String, Instant)>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn live(&self, key: &str) -> Option<String> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.live(key))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.lock()
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.lock().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.live(key).is_some())
    }
}
