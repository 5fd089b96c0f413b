//! Redis-backed counter store.
//!
//! Each identity's window is a sorted set whose members are admission
//! instants scored by the same instant. Uses
//! [`redis::aio::ConnectionManager`] for automatic reconnection; the manager
//! is cheap to clone, so each call works on its own handle.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::time::Duration;
use tracing::{error, info};

use super::store::{AtomicAdmission, CounterStore, WindowCheck};
use crate::error::{bounded, Result, StoreKind, TollgateError};

/// Store-side admission: trim, count, then add and expire only when under
/// the limit. Returns `{admitted, current}`.
const ADMIT_SCRIPT: &str = r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[1])
local current = redis.call('ZCOUNT', KEYS[1], ARGV[1], ARGV[2])
if current >= tonumber(ARGV[4]) then
  return {0, current}
end
redis.call('ZADD', KEYS[1], ARGV[2], ARGV[3])
redis.call('EXPIRE', KEYS[1], ARGV[5])
return {1, current}
"#;

fn redis_err(op: &str, e: redis::RedisError) -> TollgateError {
    error!(op = op, error = %e, "Counter store call failed");
    TollgateError::unavailable(StoreKind::Counter, format!("Redis {} failed: {}", op, e))
}

/// Counter store backed by Redis sorted sets.
pub struct RedisCounterStore {
    conn: ConnectionManager,
    timeout: Duration,
    admit_script: Script,
}

impl RedisCounterStore {
    /// Connect to a Redis instance.
    ///
    /// The `url` should be a valid Redis connection string,
    /// e.g. `redis://127.0.0.1:6379/0`. Connecting is bounded by `timeout`
    /// as well.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            TollgateError::unavailable(StoreKind::Counter, format!("Invalid Redis URL: {}", e))
        })?;
        let conn = bounded(StoreKind::Counter, timeout, "connect", async {
            ConnectionManager::new(client)
                .await
                .map_err(|e| redis_err("connect", e))
        })
        .await?;

        info!(url = %url, "Connected to counter store");
        Ok(Self {
            conn,
            timeout,
            admit_script: Script::new(ADMIT_SCRIPT),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn trim_before(&self, key: &str, cutoff: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        bounded(StoreKind::Counter, self.timeout, "ZREMRANGEBYSCORE", async {
            let _: () = conn
                .zrembyscore(key, "-inf", format!("({}", cutoff))
                .await
                .map_err(|e| redis_err("ZREMRANGEBYSCORE", e))?;
            Ok(())
        })
        .await
    }

    async fn count_in_range(&self, key: &str, low: i64, high: i64) -> Result<u64> {
        let mut conn = self.conn.clone();
        bounded(StoreKind::Counter, self.timeout, "ZCOUNT", async {
            let count: u64 = conn
                .zcount(key, low, high)
                .await
                .map_err(|e| redis_err("ZCOUNT", e))?;
            Ok(count)
        })
        .await
    }

    async fn add(&self, key: &str, member: &str, score: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        bounded(StoreKind::Counter, self.timeout, "ZADD", async {
            let _: () = conn
                .zadd(key, member, score)
                .await
                .map_err(|e| redis_err("ZADD", e))?;
            Ok(())
        })
        .await
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let seconds = ttl.as_secs().max(1);
        bounded(StoreKind::Counter, self.timeout, "EXPIRE", async {
            redis::cmd("EXPIRE")
                .arg(key)
                .arg(seconds)
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(|e| redis_err("EXPIRE", e))
        })
        .await
    }

    async fn admit_atomic(&self, key: &str, check: &WindowCheck) -> Result<AtomicAdmission> {
        let mut conn = self.conn.clone();
        let ttl = check.ttl.as_secs().max(1);
        let (admitted, current): (i64, i64) =
            bounded(StoreKind::Counter, self.timeout, "EVALSHA", async {
                self.admit_script
                    .key(key)
                    .arg(check.cutoff)
                    .arg(check.now)
                    .arg(&check.member)
                    .arg(check.limit)
                    .arg(ttl)
                    .invoke_async(&mut conn)
                    .await
                    .map_err(|e| redis_err("EVALSHA", e))
            })
            .await?;

        Ok(AtomicAdmission {
            admitted: admitted == 1,
            current: current.max(0) as u64,
        })
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        bounded(StoreKind::Counter, self.timeout, "PING", async {
            redis::cmd("PING")
                .query_async::<_, String>(&mut conn)
                .await
                .map_err(|e| redis_err("PING", e))?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    /// Return a store connected to the test instance, or panic if
    /// `TOLLGATE_REDIS_URL` is not set.
    async fn test_store() -> RedisCounterStore {
        let url =
            env::var("TOLLGATE_REDIS_URL").expect("TOLLGATE_REDIS_URL must be set for Redis tests");
        RedisCounterStore::connect(&url, Duration::from_secs(2))
            .await
            .unwrap()
    }

    fn unique_key(name: &str) -> String {
        format!("tollgate-test:{}:{}", name, uuid::Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_invalid_url_is_unavailable() {
        let err = RedisCounterStore::connect("not a url", Duration::from_millis(100))
            .await
            .err()
            .unwrap();
        assert!(err.is_store_unavailable());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis instance"]
    async fn test_trim_count_add() {
        let store = test_store().await;
        let key = unique_key("window");

        for t in [10, 20, 30] {
            store.add(&key, &t.to_string(), t).await.unwrap();
        }
        assert_eq!(store.count_in_range(&key, 10, 30).await.unwrap(), 3);

        store.trim_before(&key, 20).await.unwrap();
        assert_eq!(store.count_in_range(&key, 0, 100).await.unwrap(), 2);
    }

    #[tokio::test]
    #[ignore = "requires a running Redis instance"]
    async fn test_expiry() {
        let store = test_store().await;
        let key = unique_key("expiry");

        store.add(&key, "1", 1).await.unwrap();
        store.set_expiry(&key, Duration::from_secs(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2100)).await;

        assert_eq!(store.count_in_range(&key, 0, 10).await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore = "requires a running Redis instance"]
    async fn test_admit_atomic() {
        let store = test_store().await;
        let key = unique_key("atomic");
        let check = |now: i64| WindowCheck {
            cutoff: now - 60,
            now,
            member: now.to_string(),
            limit: 1,
            ttl: Duration::from_secs(120),
        };

        assert!(store.admit_atomic(&key, &check(0)).await.unwrap().admitted);
        let denied = store.admit_atomic(&key, &check(1)).await.unwrap();
        assert!(!denied.admitted);
        assert_eq!(denied.current, 1);
    }

    #[tokio::test]
    #[ignore = "requires a running Redis instance"]
    async fn test_health_check() {
        let store = test_store().await;
        assert!(store.health_check().await.is_ok());
    }
}
