//! In-memory key repository

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::id::{ApiId, IdentityId, KeyId};
use crate::domain::key::{apply_remaining_op, Key, KeyRepository, RemainingDecrement, RemainingOp};
use crate::domain::DomainError;

#[derive(Debug, Default)]
struct KeyTable {
    keys: HashMap<String, Key>,
    /// hash -> key id
    by_hash: HashMap<String, String>,
}

impl KeyTable {
    fn get_mut(&mut self, id: &KeyId) -> Result<&mut Key, DomainError> {
        self.keys
            .get_mut(id.as_str())
            .ok_or_else(|| DomainError::not_found(format!("Key '{}' not found", id)))
    }
}

/// Keys held in a single map; every counter change happens under its write lock
#[derive(Debug, Default)]
pub struct InMemoryKeyRepository {
    table: RwLock<KeyTable>,
}

impl InMemoryKeyRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyRepository for InMemoryKeyRepository {
    async fn get(&self, id: &KeyId) -> Result<Option<Key>, DomainError> {
        Ok(self.table.read().await.keys.get(id.as_str()).cloned())
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<Key>, DomainError> {
        let table = self.table.read().await;

        Ok(table
            .by_hash
            .get(hash)
            .and_then(|id| table.keys.get(id))
            .cloned())
    }

    async fn create(&self, key: Key) -> Result<Key, DomainError> {
        let mut table = self.table.write().await;
        let id = key.id().as_str().to_string();

        if table.keys.contains_key(&id) {
            return Err(DomainError::conflict(format!("Key '{}' already exists", id)));
        }

        if table.by_hash.contains_key(key.hash()) {
            return Err(DomainError::conflict("A key with the same secret already exists"));
        }

        table.by_hash.insert(key.hash().to_string(), id.clone());
        table.keys.insert(id, key.clone());

        Ok(key)
    }

    async fn update(&self, key: Key) -> Result<Key, DomainError> {
        let mut table = self.table.write().await;
        let stored = table.get_mut(key.id())?;

        // counters are owned by the atomic operations below
        let key = key
            .with_remaining(stored.remaining())
            .with_last_refill_at(stored.last_refill_at());
        *stored = key.clone();

        Ok(key)
    }

    async fn soft_delete(&self, id: &KeyId, at: DateTime<Utc>) -> Result<bool, DomainError> {
        let mut table = self.table.write().await;

        match table.keys.get_mut(id.as_str()) {
            Some(key) if !key.is_deleted() => {
                key.mark_deleted(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_by_api(&self, api_id: &ApiId) -> Result<Vec<Key>, DomainError> {
        let table = self.table.read().await;
        let mut keys: Vec<Key> = table
            .keys
            .values()
            .filter(|k| k.api_id() == api_id && !k.is_deleted())
            .cloned()
            .collect();
        keys.sort_by_key(|k| k.created_at());

        Ok(keys)
    }

    async fn list_by_identity(&self, identity_id: &IdentityId) -> Result<Vec<Key>, DomainError> {
        let table = self.table.read().await;

        Ok(table
            .keys
            .values()
            .filter(|k| k.identity_id() == Some(identity_id) && !k.is_deleted())
            .cloned()
            .collect())
    }

    async fn unlink_identity(&self, identity_id: &IdentityId) -> Result<u64, DomainError> {
        let mut table = self.table.write().await;
        let mut changed = 0;

        for key in table.keys.values_mut() {
            if key.identity_id() == Some(identity_id) {
                key.set_identity_id(None);
                changed += 1;
            }
        }

        Ok(changed)
    }

    async fn decrement_remaining(
        &self,
        id: &KeyId,
        amount: i64,
    ) -> Result<RemainingDecrement, DomainError> {
        let mut table = self.table.write().await;
        let key = table.get_mut(id)?;

        let Some(current) = key.remaining() else {
            return Ok(RemainingDecrement::Unlimited);
        };

        if current < amount {
            return Ok(RemainingDecrement::UsageExceeded { remaining: current });
        }

        let remaining = current - amount;
        key.set_remaining(Some(remaining));

        Ok(RemainingDecrement::Decremented { remaining })
    }

    async fn update_remaining(
        &self,
        id: &KeyId,
        op: RemainingOp,
        value: Option<i64>,
    ) -> Result<Option<i64>, DomainError> {
        let mut table = self.table.write().await;
        let key = table.get_mut(id)?;

        let remaining = apply_remaining_op(key.remaining(), op, value)?;
        key.set_remaining(remaining);

        Ok(remaining)
    }

    async fn refill(
        &self,
        id: &KeyId,
        amount: i64,
        period_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, DomainError> {
        let mut table = self.table.write().await;
        let key = table.get_mut(id)?;

        let last = key.last_refill_at().unwrap_or(key.created_at());
        if last >= period_start {
            return Ok(None);
        }

        key.apply_refill(amount, now);
        Ok(Some(amount))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use futures::future::join_all;

    use super::*;

    fn api_id() -> ApiId {
        ApiId::new("api_test").unwrap()
    }

    fn key(hash: &str, remaining: Option<i64>) -> Key {
        Key::new(api_id(), hash, "sk_abcd").with_remaining(remaining)
    }

    #[tokio::test]
    async fn test_create_and_find_by_hash() {
        let repo = InMemoryKeyRepository::new();
        let created = repo.create(key("hash-1", None)).await.unwrap();

        let found = repo.find_by_hash("hash-1").await.unwrap().unwrap();
        assert_eq!(found.id(), created.id());
        assert!(repo.find_by_hash("hash-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_hash() {
        let repo = InMemoryKeyRepository::new();
        repo.create(key("hash-1", None)).await.unwrap();

        let result = repo.create(key("hash-1", None)).await;
        assert!(matches!(result, Err(DomainError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_decrement_until_exhausted() {
        let repo = InMemoryKeyRepository::new();
        let created = repo.create(key("hash-1", Some(2))).await.unwrap();
        let id = created.id();

        assert_eq!(
            repo.decrement_remaining(id, 1).await.unwrap(),
            RemainingDecrement::Decremented { remaining: 1 }
        );
        assert_eq!(
            repo.decrement_remaining(id, 1).await.unwrap(),
            RemainingDecrement::Decremented { remaining: 0 }
        );
        assert_eq!(
            repo.decrement_remaining(id, 1).await.unwrap(),
            RemainingDecrement::UsageExceeded { remaining: 0 }
        );
    }

    #[tokio::test]
    async fn test_decrement_cost_larger_than_remaining() {
        let repo = InMemoryKeyRepository::new();
        let created = repo.create(key("hash-1", Some(3))).await.unwrap();

        assert_eq!(
            repo.decrement_remaining(created.id(), 5).await.unwrap(),
            RemainingDecrement::UsageExceeded { remaining: 3 }
        );
        assert_eq!(repo.get(created.id()).await.unwrap().unwrap().remaining(), Some(3));
    }

    #[tokio::test]
    async fn test_decrement_unlimited() {
        let repo = InMemoryKeyRepository::new();
        let created = repo.create(key("hash-1", None)).await.unwrap();

        assert_eq!(
            repo.decrement_remaining(created.id(), 1).await.unwrap(),
            RemainingDecrement::Unlimited
        );
    }

    #[tokio::test]
    async fn test_concurrent_decrements_never_go_negative() {
        let repo = Arc::new(InMemoryKeyRepository::new());
        let created = repo.create(key("hash-1", Some(10))).await.unwrap();

        let tasks = (0..25).map(|_| {
            let repo = repo.clone();
            let id = created.id().clone();
            tokio::spawn(async move { repo.decrement_remaining(&id, 1).await.unwrap() })
        });

        let results: Vec<_> = join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect();
        let decremented = results
            .iter()
            .filter(|r| matches!(r, RemainingDecrement::Decremented { .. }))
            .count();

        assert_eq!(decremented, 10);
        assert_eq!(repo.get(created.id()).await.unwrap().unwrap().remaining(), Some(0));
    }

    #[tokio::test]
    async fn test_update_keeps_counters() {
        let repo = InMemoryKeyRepository::new();
        let created = repo.create(key("hash-1", Some(5))).await.unwrap();
        repo.decrement_remaining(created.id(), 2).await.unwrap();

        let mut stale = created.clone();
        stale.set_name(Some("renamed".to_string()));
        let updated = repo.update(stale).await.unwrap();

        assert_eq!(updated.name(), Some("renamed"));
        assert_eq!(updated.remaining(), Some(3));
    }

    #[tokio::test]
    async fn test_update_remaining_ops() {
        let repo = InMemoryKeyRepository::new();
        let created = repo.create(key("hash-1", Some(0))).await.unwrap();
        let id = created.id();

        assert_eq!(
            repo.update_remaining(id, RemainingOp::Increment, Some(5)).await.unwrap(),
            Some(5)
        );
        assert_eq!(
            repo.update_remaining(id, RemainingOp::Decrement, Some(9)).await.unwrap(),
            Some(0)
        );
        assert_eq!(repo.update_remaining(id, RemainingOp::Set, None).await.unwrap(), None);

        let result = repo.update_remaining(id, RemainingOp::Increment, Some(1)).await;
        assert!(matches!(result, Err(DomainError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_update_remaining_missing_key() {
        let repo = InMemoryKeyRepository::new();
        let id = KeyId::generate();

        let result = repo.update_remaining(&id, RemainingOp::Set, Some(1)).await;
        assert!(matches!(result, Err(DomainError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_soft_delete() {
        let repo = InMemoryKeyRepository::new();
        let created = repo.create(key("hash-1", None)).await.unwrap();

        assert!(repo.soft_delete(created.id(), Utc::now()).await.unwrap());
        assert!(!repo.soft_delete(created.id(), Utc::now()).await.unwrap());

        let found = repo.find_by_hash("hash-1").await.unwrap().unwrap();
        assert!(found.is_deleted());
        assert!(repo.list_by_api(&api_id()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refill_once_per_period() {
        let repo = InMemoryKeyRepository::new();
        let created_at = Utc::now() - Duration::days(2);
        let created = repo
            .create(key("hash-1", Some(0)).with_timestamps(created_at, created_at))
            .await
            .unwrap();

        let now = Utc::now();
        let period_start = now - Duration::hours(1);

        assert_eq!(
            repo.refill(created.id(), 10, period_start, now).await.unwrap(),
            Some(10)
        );
        assert_eq!(repo.refill(created.id(), 10, period_start, now).await.unwrap(), None);

        let stored = repo.get(created.id()).await.unwrap().unwrap();
        assert_eq!(stored.remaining(), Some(10));
        assert_eq!(stored.last_refill_at(), Some(now));
    }

    #[tokio::test]
    async fn test_unlink_identity() {
        let repo = InMemoryKeyRepository::new();
        let identity = IdentityId::generate();
        repo.create(key("hash-1", None).with_identity(Some(identity.clone())))
            .await
            .unwrap();
        repo.create(key("hash-2", None).with_identity(Some(identity.clone())))
            .await
            .unwrap();
        repo.create(key("hash-3", None)).await.unwrap();

        assert_eq!(repo.list_by_identity(&identity).await.unwrap().len(), 2);
        assert_eq!(repo.unlink_identity(&identity).await.unwrap(), 2);
        assert!(repo.list_by_identity(&identity).await.unwrap().is_empty());
    }
}
