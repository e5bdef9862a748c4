//! Atomic window counters backing the ratelimit evaluator

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::DomainError;

#[cfg(test)]
use mockall::automock;

/// Result of charging a counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterCharge {
    /// Whether the cost fit under the limit and was recorded
    pub passed: bool,
    /// Counter value after the call
    pub current: i64,
}

/// Store of per-window counters
///
/// Implementations must make `charge` atomic per key: concurrent callers never
/// observe a counter above `limit` because of one another.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Adds `cost` to the counter under `key` unless the result would exceed `limit`.
    /// A fresh counter expires after `ttl`.
    async fn charge(
        &self,
        key: &str,
        cost: i64,
        limit: i64,
        ttl: Duration,
    ) -> Result<CounterCharge, DomainError>;

    /// Current value of the counter, zero when absent or expired
    async fn current(&self, key: &str) -> Result<i64, DomainError>;
}
