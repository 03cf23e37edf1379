//! Fixed-window rate limiting.

use super::cache::CacheError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Counts attempts per key and window.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Record an attempt for `key` and report whether it is within `limit`
    /// attempts for the current `window`.
    async fn is_allowed(&self, key: &str, limit: u32, window: Duration) -> Result<bool, CacheError>;
}

/// Redis limiter: `INCR` plus `EXPIRE` on first hit, in one atomic pipeline.
#[derive(Clone)]
pub struct RedisRateLimiter {
    conn_manager: ConnectionManager,
}

impl RedisRateLimiter {
    /// Limiter on an existing connection.
    #[must_use]
    pub const fn new(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }

    fn key(key: &str) -> String {
        format!("rate_limit:{key}")
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn is_allowed(&self, key: &str, limit: u32, window: Duration) -> Result<bool, CacheError> {
        let mut conn = self.conn_manager.clone();
        let rate_key = Self::key(key);
        let window_secs = window.as_secs().max(1);

        // NX keeps the window anchored at the first attempt.
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .incr(&rate_key, 1)
            .cmd("EXPIRE")
            .arg(&rate_key)
            .arg(window_secs)
            .arg("NX")
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, key = %key, "Rate limit pipeline failed");
                CacheError::Backend(format!("Failed to check rate limit: {e}"))
            })?;

        let allowed = count <= u64::from(limit);
        if !allowed {
            tracing::warn!(key = %key, count, limit, "Rate limit exceeded");
        }
        Ok(allowed)
    }
}

/// Process-local limiter.
#[derive(Clone, Default)]
pub struct InMemoryRateLimiter {
    windows: Arc<Mutex<HashMap<String, (u32, Instant)>>>,
}

impl InMemoryRateLimiter {
    /// No attempts recorded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, (u32, Instant)>> {
        self.windows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn is_allowed(&self, key: &str, limit: u32, window: Duration) -> Result<bool, CacheError> {
        let mut windows = self.lock();
        let now = Instant::now();
        let entry = windows.entry(key.to_string()).or_insert((0, now + window));
        if entry.1 <= now {
            *entry = (0, now + window);
        }
        entry.0 = entry.0.saturating_add(1);
        Ok(entry.0 <= limit)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn attempts_beyond_limit_are_refused_per_key() {
        let limiter = InMemoryRateLimiter::new();
        let window = Duration::from_secs(60);

        for _ in 0..3 {
            assert!(limiter.is_allowed("login:wei", 3, window).await.unwrap());
        }
        assert!(!limiter.is_allowed("login:wei", 3, window).await.unwrap());
        assert!(limiter.is_allowed("login:ana", 3, window).await.unwrap());
    }

    #[tokio::test]
    async fn window_resets_after_expiry() {
        let limiter = InMemoryRateLimiter::new();
        assert!(limiter.is_allowed("k", 1, Duration::ZERO).await.unwrap());
        assert!(limiter.is_allowed("k", 1, Duration::ZERO).await.unwrap());
    }
}
