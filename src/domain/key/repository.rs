//! Key store trait
//!
//! Every method that changes `remaining` must be atomic with respect to
//! concurrent callers on the same key and must never leave it negative.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::Key;
use crate::domain::id::{ApiId, IdentityId, KeyId};
use crate::domain::DomainError;

#[cfg(test)]
use mockall::automock;

/// Result of an attempt to consume usage from a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemainingDecrement {
    /// Usage was consumed, `remaining` is the new value
    Decremented { remaining: i64 },
    /// Not enough usage left; nothing was consumed
    UsageExceeded { remaining: i64 },
    /// The key has no usage limit
    Unlimited,
}

/// Administrative change to a key's usage counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemainingOp {
    Increment,
    Decrement,
    Set,
}

impl std::fmt::Display for RemainingOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Increment => write!(f, "increment"),
            Self::Decrement => write!(f, "decrement"),
            Self::Set => write!(f, "set"),
        }
    }
}

/// Apply a remaining operation to a current value
///
/// Returns the new value (clamped at zero), or `None` when the key becomes unlimited.
/// Increment and decrement are rejected on unlimited keys.
pub fn apply_remaining_op(
    current: Option<i64>,
    op: RemainingOp,
    value: Option<i64>,
) -> Result<Option<i64>, DomainError> {
    match (op, current, value) {
        (RemainingOp::Set, _, value) => Ok(value.map(|v| v.max(0))),
        (_, None, _) => Err(DomainError::validation(format!(
            "Cannot {} remaining on a key without a usage limit",
            op
        ))),
        (_, Some(_), None) => Err(DomainError::validation(format!(
            "A value is required to {} remaining",
            op
        ))),
        (RemainingOp::Increment, Some(current), Some(value)) => {
            Ok(Some(current.saturating_add(value).max(0)))
        }
        (RemainingOp::Decrement, Some(current), Some(value)) => {
            Ok(Some(current.saturating_sub(value).max(0)))
        }
    }
}

/// Repository trait for key storage
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KeyRepository: Send + Sync {
    async fn get(&self, id: &KeyId) -> Result<Option<Key>, DomainError>;

    /// Look up a key by the hash of its secret, including soft-deleted keys
    async fn find_by_hash(&self, hash: &str) -> Result<Option<Key>, DomainError>;

    /// Create a key; the id and hash must both be unique
    async fn create(&self, key: Key) -> Result<Key, DomainError>;

    /// Persist metadata changes made through the key's setters
    async fn update(&self, key: Key) -> Result<Key, DomainError>;

    /// Mark a key deleted; returns false if it does not exist or is already deleted
    async fn soft_delete(&self, id: &KeyId, at: DateTime<Utc>) -> Result<bool, DomainError>;

    /// Non-deleted keys of an API
    async fn list_by_api(&self, api_id: &ApiId) -> Result<Vec<Key>, DomainError>;

    /// Non-deleted keys bound to an identity
    async fn list_by_identity(&self, identity_id: &IdentityId) -> Result<Vec<Key>, DomainError>;

    /// Detach every key from an identity, returning how many were changed
    async fn unlink_identity(&self, identity_id: &IdentityId) -> Result<u64, DomainError>;

    /// Atomically consume `amount` usage if at least that much is left
    async fn decrement_remaining(
        &self,
        id: &KeyId,
        amount: i64,
    ) -> Result<RemainingDecrement, DomainError>;

    /// Apply an administrative change to `remaining` (see [`apply_remaining_op`])
    async fn update_remaining(
        &self,
        id: &KeyId,
        op: RemainingOp,
        value: Option<i64>,
    ) -> Result<Option<i64>, DomainError>;

    /// Reset `remaining` to `amount` unless the key was already refilled at or
    /// after `period_start`. Returns the new value when a refill happened.
    async fn refill(
        &self,
        id: &KeyId,
        amount: i64,
        period_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_increment_and_decrement() {
        assert_eq!(
            apply_remaining_op(Some(0), RemainingOp::Increment, Some(5)).unwrap(),
            Some(5)
        );
        assert_eq!(
            apply_remaining_op(Some(3), RemainingOp::Decrement, Some(10)).unwrap(),
            Some(0)
        );
    }

    #[test]
    fn test_apply_set() {
        assert_eq!(apply_remaining_op(None, RemainingOp::Set, Some(7)).unwrap(), Some(7));
        assert_eq!(apply_remaining_op(Some(7), RemainingOp::Set, None).unwrap(), None);
        assert_eq!(apply_remaining_op(Some(7), RemainingOp::Set, Some(-3)).unwrap(), Some(0));
    }

    #[test]
    fn test_apply_rejects_unlimited() {
        let result = apply_remaining_op(None, RemainingOp::Increment, Some(5));
        assert!(matches!(result, Err(DomainError::Validation { .. })));
    }

    #[test]
    fn test_apply_requires_value() {
        let result = apply_remaining_op(Some(5), RemainingOp::Decrement, None);
        assert!(matches!(result, Err(DomainError::Validation { .. })));
    }
}
