//! Cache, distributed lock and rate limiter.
//!
//! Each concern is a trait with a Redis implementation for multi-instance
//! deployments and an in-memory one for tests and single-process runs.

pub mod cache;
pub mod lock;
pub mod rate_limit;

pub use cache::{Cache, CacheError, InMemoryCache, RedisCache};
pub use lock::{DistributedLock, InMemoryLock, LockError, LockGuard, RedisLock};
pub use rate_limit::{InMemoryRateLimiter, RateLimiter, RedisRateLimiter};

use redis::Client;
use redis::aio::ConnectionManager;

/// Open a managed connection shared by the Redis implementations.
///
/// # Errors
///
/// Returns [`CacheError::Backend`] if the URL is invalid or Redis is unreachable.
pub async fn connect_redis(redis_url: &str) -> Result<ConnectionManager, CacheError> {
    let client = Client::open(redis_url)
        .map_err(|e| CacheError::Backend(format!("Failed to create Redis client: {e}")))?;
    let manager = ConnectionManager::new(client).await.map_err(|e| {
        CacheError::Backend(format!("Failed to create Redis connection manager: {e}"))
    })?;
    tracing::info!("Redis connection manager ready");
    Ok(manager)
}
