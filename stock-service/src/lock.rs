//! Mutual exclusion for reservations touching the same product set.
//!
//! The lock is held around a ledger operation only to serialize work across
//! service instances; the ledger's row locks remain the source of
//! correctness.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use shared::ItemWithQuantity;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

pub const LOCK_PREFIX: &str = "reserve_stock_";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("lock {key} is held by another request")]
    Contended { key: String },
    #[error("lock store: {0}")]
    Store(String),
}

impl From<redis::RedisError> for LockError {
    fn from(err: redis::RedisError) -> Self {
        LockError::Store(err.to_string())
    }
}

/// Proof of ownership; release only succeeds for the holder's token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGuard {
    key: String,
    token: String,
}

impl LockGuard {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            token: Uuid::new_v4().to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Fails fast with `Contended` rather than waiting.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<LockGuard, LockError>;

    async fn release(&self, guard: LockGuard) -> Result<(), LockError>;
}

/// Key for a set of items: the sorted, deduplicated product ids.
pub fn lock_key(items: &[ItemWithQuantity]) -> String {
    let mut ids: Vec<&str> = items.iter().map(|i| i.product_id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    format!("{LOCK_PREFIX}{}", ids.join("_"))
}

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Clone)]
pub struct RedisLock {
    conn: MultiplexedConnection,
}

impl RedisLock {
    pub async fn connect(url: &str) -> Result<Self, LockError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<LockGuard, LockError> {
        let guard = LockGuard::new(key);
        let mut conn = self.conn.clone();

        let set: Option<String> = redis::cmd("SET")
            .arg(&guard.key)
            .arg(&guard.token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        match set {
            Some(_) => Ok(guard),
            None => Err(LockError::Contended { key: guard.key }),
        }
    }

    async fn release(&self, guard: LockGuard) -> Result<(), LockError> {
        let mut conn = self.conn.clone();
        let script = redis::Script::new(RELEASE_SCRIPT);
        let _deleted: i64 = script
            .key(&guard.key)
            .arg(&guard.token)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}

/// Process-local lock with the same expiry semantics, for tests and
/// single-instance runs.
#[derive(Default)]
pub struct InMemoryLock {
    held: Mutex<HashMap<String, (String, Instant)>>,
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, key: &str) -> bool {
        let held = self.held.lock().unwrap_or_else(|p| p.into_inner());
        held.get(key).is_some_and(|(_, expires)| *expires > Instant::now())
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<LockGuard, LockError> {
        let now = Instant::now();
        let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
        if let Some((_, expires)) = held.get(key) {
            if *expires > now {
                return Err(LockError::Contended { key: key.to_string() });
            }
        }

        let guard = LockGuard::new(key);
        held.insert(key.to_string(), (guard.token.clone(), now + ttl));
        Ok(guard)
    }

    async fn release(&self, guard: LockGuard) -> Result<(), LockError> {
        let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
        if held.get(&guard.key).is_some_and(|(token, _)| *token == guard.token) {
            held.remove(&guard.key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_ignores_order_and_duplicates() {
        let a = lock_key(&[ItemWithQuantity::new("b", 1), ItemWithQuantity::new("a", 2)]);
        let b = lock_key(&[
            ItemWithQuantity::new("a", 5),
            ItemWithQuantity::new("b", 1),
            ItemWithQuantity::new("a", 1),
        ]);
        assert_eq!(a, "reserve_stock_a_b");
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn second_acquire_is_contended_until_release() {
        let lock = InMemoryLock::new();
        let guard = lock.acquire("k", Duration::from_secs(60)).await.unwrap();

        assert_eq!(
            lock.acquire("k", Duration::from_secs(60)).await,
            Err(LockError::Contended { key: "k".into() })
        );
        assert!(lock.acquire("other", Duration::from_secs(60)).await.is_ok());

        lock.release(guard).await.unwrap();
        assert!(lock.acquire("k", Duration::from_secs(60)).await.is_ok());
    }

    #[tokio::test]
    async fn expired_lock_can_be_taken_and_stale_release_is_ignored() {
        let lock = InMemoryLock::new();
        let stale = lock.acquire("k", Duration::ZERO).await.unwrap();

        let fresh = lock.acquire("k", Duration::from_secs(60)).await.unwrap();
        lock.release(stale).await.unwrap();
        assert!(lock.is_held("k"));

        lock.release(fresh).await.unwrap();
        assert!(!lock.is_held("k"));
    }
}
