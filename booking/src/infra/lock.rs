//! Mutual exclusion across service instances.
//!
//! A lock is a key holding a random token with an expiry. Only the holder of
//! the token can release it, and an expired lock is free for the next caller.

use async_trait::async_trait;
use rand::Rng;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Lock failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Someone else held the lock for the whole wait.
    #[error("Timed out waiting for lock on {0}")]
    Timeout(String),

    /// The backend could not be reached or rejected the command.
    #[error("Lock backend error: {0}")]
    Backend(String),
}

/// Proof of holding a lock.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a lock guard must be released"]
pub struct LockGuard {
    resource: String,
    token: String,
}

impl LockGuard {
    /// Locked resource name
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }
}

/// Distributed lock.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Try once to take the lock for `ttl`.
    async fn try_acquire(&self, resource: &str, ttl: Duration) -> Result<Option<LockGuard>, LockError>;

    /// Release a held lock. Returns `false` if it had already expired or been
    /// taken over.
    async fn release(&self, guard: LockGuard) -> Result<bool, LockError>;

    /// Take the lock, retrying every `retry_delay` (plus jitter) for up to `wait`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] if the lock stayed taken for the whole wait.
    async fn acquire(
        &self,
        resource: &str,
        ttl: Duration,
        wait: Duration,
        retry_delay: Duration,
    ) -> Result<LockGuard, LockError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(guard) = self.try_acquire(resource, ttl).await? {
                return Ok(guard);
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(resource = %resource, "Lock wait timed out");
                return Err(LockError::Timeout(resource.to_string()));
            }
            let jitter_ms = u64::try_from(retry_delay.as_millis() / 2).unwrap_or(0);
            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
            tokio::time::sleep((retry_delay + jitter).min(deadline - now)).await;
        }
    }
}

fn new_guard(resource: &str) -> LockGuard {
    LockGuard {
        resource: resource.to_string(),
        token: Uuid::new_v4().to_string(),
    }
}

// ============================================================================
// Redis
// ============================================================================

/// Redis lock: `SET key token NX PX ttl`, released by a compare-and-delete script.
#[derive(Clone)]
pub struct RedisLock {
    conn_manager: ConnectionManager,
}

impl RedisLock {
    /// Lock on an existing connection.
    #[must_use]
    pub const fn new(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }

    fn key(resource: &str) -> String {
        format!("lock:{resource}")
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn try_acquire(&self, resource: &str, ttl: Duration) -> Result<Option<LockGuard>, LockError> {
        let mut conn = self.conn_manager.clone();
        let guard = new_guard(resource);
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::key(resource))
            .arg(&guard.token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(format!("Failed to acquire lock: {e}")))?;

        Ok(reply.map(|_| guard))
    }

    async fn release(&self, guard: LockGuard) -> Result<bool, LockError> {
        let mut conn = self.conn_manager.clone();
        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(Self::key(&guard.resource))
            .arg(&guard.token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(format!("Failed to release lock: {e}")))?;

        if deleted == 0 {
            tracing::warn!(resource = %guard.resource, "Lock expired before release");
        }
        Ok(deleted == 1)
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-local lock table.
#[derive(Clone, Default)]
pub struct InMemoryLock {
    held: Arc<Mutex<HashMap<String, (String, Instant)>>>,
}

impl InMemoryLock {
    /// No locks held.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, (String, Instant)>> {
        self.held
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn try_acquire(&self, resource: &str, ttl: Duration) -> Result<Option<LockGuard>, LockError> {
        let mut held = self.lock();
        let now = Instant::now();
        if held.get(resource).is_some_and(|(_, expires_at)| *expires_at > now) {
            return Ok(None);
        }
        let guard = new_guard(resource);
        held.insert(resource.to_string(), (guard.token.clone(), now + ttl));
        Ok(Some(guard))
    }

    async fn release(&self, guard: LockGuard) -> Result<bool, LockError> {
        let mut held = self.lock();
        let owned = held
            .get(&guard.resource)
            .is_some_and(|(token, expires_at)| *token == guard.token && *expires_at > Instant::now());
        if owned {
            held.remove(&guard.resource);
        }
        Ok(owned)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_caller_waits_for_release() {
        let locks = InMemoryLock::new();
        let ttl = Duration::from_secs(10);
        let guard = locks.try_acquire("flight:1", ttl).await.unwrap().unwrap();
        assert!(locks.try_acquire("flight:1", ttl).await.unwrap().is_none());
        assert!(locks.try_acquire("flight:2", ttl).await.unwrap().is_some());

        assert!(locks.release(guard).await.unwrap());
        assert!(locks.try_acquire("flight:1", ttl).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn acquire_times_out_while_held() {
        let locks = InMemoryLock::new();
        let _held = locks.try_acquire("r", Duration::from_secs(10)).await.unwrap().unwrap();
        let result = locks
            .acquire("r", Duration::from_secs(1), Duration::from_millis(30), Duration::from_millis(10))
            .await;
        assert_eq!(result, Err(LockError::Timeout("r".to_string())));
    }

    #[tokio::test]
    async fn expired_lock_cannot_be_released_by_old_holder() {
        let locks = InMemoryLock::new();
        let stale = locks.try_acquire("r", Duration::ZERO).await.unwrap().unwrap();
        let fresh = locks.try_acquire("r", Duration::from_secs(10)).await.unwrap().unwrap();

        assert!(!locks.release(stale).await.unwrap());
        assert!(locks.release(fresh).await.unwrap());
    }
}
