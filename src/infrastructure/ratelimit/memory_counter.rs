//! In-process window counters

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::ratelimit::{CounterCharge, CounterStore};
use crate::domain::DomainError;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: i64,
    expires_at: Instant,
}

#[derive(Debug)]
struct Windows {
    entries: HashMap<String, Window>,
    last_cleanup: Instant,
}

/// Counters held in a single map; expired windows are pruned on access
#[derive(Debug)]
pub struct InMemoryCounterStore {
    windows: Mutex<Windows>,
    cleanup_interval: Duration,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(Windows {
                entries: HashMap::new(),
                last_cleanup: Instant::now(),
            }),
            cleanup_interval: Duration::from_secs(60),
        }
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Number of live or not yet pruned windows
    pub async fn len(&self) -> usize {
        self.windows.lock().await.entries.len()
    }

    fn maybe_cleanup(&self, windows: &mut Windows, now: Instant) {
        if now.duration_since(windows.last_cleanup) < self.cleanup_interval {
            return;
        }

        windows.entries.retain(|_, window| window.expires_at > now);
        windows.last_cleanup = now;
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn charge(
        &self,
        key: &str,
        cost: i64,
        limit: i64,
        ttl: Duration,
    ) -> Result<CounterCharge, DomainError> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        self.maybe_cleanup(&mut windows, now);

        let window = windows
            .entries
            .entry(key.to_string())
            .and_modify(|window| {
                if window.expires_at <= now {
                    *window = Window {
                        count: 0,
                        expires_at: now + ttl,
                    };
                }
            })
            .or_insert(Window {
                count: 0,
                expires_at: now + ttl,
            });

        let next = match window.count.checked_add(cost) {
            Some(next) if next <= limit => next,
            _ => {
                return Ok(CounterCharge {
                    passed: false,
                    current: window.count,
                });
            }
        };

        window.count = next;

        Ok(CounterCharge {
            passed: true,
            current: window.count,
        })
    }

    async fn current(&self, key: &str) -> Result<i64, DomainError> {
        let now = Instant::now();
        let windows = self.windows.lock().await;

        Ok(windows
            .entries
            .get(key)
            .filter(|window| window.expires_at > now)
            .map(|window| window.count)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::future::join_all;

    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_charge_until_limit() {
        let store = InMemoryCounterStore::new();

        for expected in 1..=3 {
            let charge = store.charge("k", 1, 3, TTL).await.unwrap();
            assert!(charge.passed);
            assert_eq!(charge.current, expected);
        }

        let charge = store.charge("k", 1, 3, TTL).await.unwrap();
        assert!(!charge.passed);
        assert_eq!(charge.current, 3);
    }

    #[tokio::test]
    async fn test_rejected_charge_is_not_recorded() {
        let store = InMemoryCounterStore::new();
        store.charge("k", 2, 5, TTL).await.unwrap();

        assert!(!store.charge("k", 4, 5, TTL).await.unwrap().passed);
        assert!(store.charge("k", 3, 5, TTL).await.unwrap().passed);
        assert_eq!(store.current("k").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_overflowing_cost_is_rejected() {
        let store = InMemoryCounterStore::new();
        store.charge("k", 1, 10, TTL).await.unwrap();

        let charge = store.charge("k", i64::MAX, 10, TTL).await.unwrap();
        assert!(!charge.passed);
        assert_eq!(charge.current, 1);

        let passed = {
            let mut passed = 0;
            for _ in 0..100 {
                if store.charge("k", 1, 10, TTL).await.unwrap().passed {
                    passed += 1;
                }
            }
            passed
        };
        assert_eq!(passed, 9);
    }

    #[tokio::test]
    async fn test_expired_window_starts_fresh() {
        let store = InMemoryCounterStore::new();
        let ttl = Duration::from_millis(20);

        store.charge("k", 1, 1, ttl).await.unwrap();
        assert!(!store.charge("k", 1, 1, ttl).await.unwrap().passed);

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.current("k").await.unwrap(), 0);
        assert!(store.charge("k", 1, 1, ttl).await.unwrap().passed);
    }

    #[tokio::test]
    async fn test_cleanup_prunes_expired_windows() {
        let store = InMemoryCounterStore::new().with_cleanup_interval(Duration::ZERO);
        let ttl = Duration::from_millis(10);

        store.charge("a", 1, 5, ttl).await.unwrap();
        store.charge("b", 1, 5, ttl).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        store.charge("c", 1, 5, TTL).await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_charges_respect_limit() {
        let store = Arc::new(InMemoryCounterStore::new());

        let tasks = (0..50).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.charge("k", 1, 10, TTL).await.unwrap() })
        });

        let passed = join_all(tasks)
            .await
            .into_iter()
            .filter(|r| r.as_ref().map(|c| c.passed).unwrap_or(false))
            .count();

        assert_eq!(passed, 10);
        assert_eq!(store.current("k").await.unwrap(), 10);
    }
}
