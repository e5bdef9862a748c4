//! Redis window counters
//!
//! The limit check, `INCRBY` and `PEXPIRE NX` run inside one Lua script so a
//! rejected charge never touches the key. Requires Redis 7 for `PEXPIRE ... NX`.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};

use crate::domain::ratelimit::{CounterCharge, CounterStore};
use crate::domain::DomainError;

/// KEYS[1] counter; ARGV cost, limit, ttl in ms. Returns {passed, current}.
const CHARGE_SCRIPT: &str = r"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if tonumber(ARGV[1]) > tonumber(ARGV[2]) - current then
    return {0, current}
end
local next = redis.call('INCRBY', KEYS[1], ARGV[1])
redis.call('PEXPIRE', KEYS[1], ARGV[3], 'NX')
return {1, next}
";

#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
    key_prefix: String,
    charge_script: Script,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("key_prefix", &self.key_prefix)
            .field("connection", &"<ConnectionManager>")
            .finish()
    }
}

impl RedisCounterStore {
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self, DomainError> {
        let client = Client::open(url)
            .map_err(|e| DomainError::configuration(format!("Invalid Redis URL: {}", e)))?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| DomainError::counter(format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self {
            connection,
            key_prefix: key_prefix.into(),
            charge_script: Script::new(CHARGE_SCRIPT),
        })
    }

    fn prefixed(&self, key: &str) -> String {
        if self.key_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.key_prefix, key)
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn charge(
        &self,
        key: &str,
        cost: i64,
        limit: i64,
        ttl: Duration,
    ) -> Result<CounterCharge, DomainError> {
        let key = self.prefixed(key);
        let mut conn = self.connection.clone();
        let ttl_ms = ttl.as_millis().max(1) as u64;

        let (passed, current): (i64, i64) = self
            .charge_script
            .key(&key)
            .arg(cost)
            .arg(limit)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| DomainError::counter(format!("Failed to charge '{}': {}", key, e)))?;

        Ok(CounterCharge {
            passed: passed == 1,
            current,
        })
    }

    async fn current(&self, key: &str) -> Result<i64, DomainError> {
        let key = self.prefixed(key);
        let mut conn = self.connection.clone();

        let value: Option<i64> = conn
            .get(&key)
            .await
            .map_err(|e| DomainError::counter(format!("Failed to read '{}': {}", key, e)))?;

        Ok(value.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;

    async fn store() -> RedisCounterStore {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        RedisCounterStore::connect(&url, format!("keygate_test_{}", uuid::Uuid::new_v4().simple()))
            .await
            .unwrap()
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_rejected_charge_leaves_counter_untouched() {
        let store = store().await;
        let ttl = Duration::from_secs(10);

        assert!(store.charge("k", 2, 3, ttl).await.unwrap().passed);

        let rejected = store.charge("k", 2, 3, ttl).await.unwrap();
        assert!(!rejected.passed);
        assert_eq!(rejected.current, 2);
        assert_eq!(store.current("k").await.unwrap(), 2);
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_window_expires() {
        let store = store().await;
        let ttl = Duration::from_millis(50);

        store.charge("k", 1, 1, ttl).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(store.current("k").await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_rejected_charge_on_missing_key_creates_nothing() {
        let store = store().await;
        let ttl = Duration::from_secs(10);

        let rejected = store.charge("k", 5, 3, ttl).await.unwrap();
        assert!(!rejected.passed);
        assert_eq!(rejected.current, 0);

        let mut conn = store.connection.clone();
        let exists: bool = conn.exists(store.prefixed("k")).await.unwrap();
        assert!(!exists);
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_concurrent_charges_near_limit() {
        let store = store().await;
        let key = format!("burst_{}", uuid::Uuid::new_v4().simple());

        let tasks = (0..50).map(|_| {
            let store = store.clone();
            let key = key.clone();
            tokio::spawn(async move { store.charge(&key, 1, 10, Duration::from_secs(10)).await.unwrap() })
        });

        let passed = join_all(tasks)
            .await
            .into_iter()
            .filter(|r| r.as_ref().map(|c| c.passed).unwrap_or(false))
            .count();

        assert_eq!(passed, 10);
        assert_eq!(store.current(&key).await.unwrap(), 10);
    }
}
