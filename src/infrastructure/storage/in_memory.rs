//! In-memory document storage

use std::collections::HashMap;
use std::fmt::Debug;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::storage::{Storage, StorageEntity, StorageKey};
use crate::domain::DomainError;

/// Thread-safe in-memory storage
///
/// Used for development and tests. Data is lost when the process terminates.
#[derive(Debug)]
pub struct InMemoryStorage<E>
where
    E: StorageEntity,
{
    entities: RwLock<HashMap<String, E>>,
}

impl<E> Default for InMemoryStorage<E>
where
    E: StorageEntity,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> InMemoryStorage<E>
where
    E: StorageEntity,
{
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<E> Storage<E> for InMemoryStorage<E>
where
    E: StorageEntity + 'static,
{
    async fn get(&self, key: &E::Key) -> Result<Option<E>, DomainError> {
        Ok(self.entities.read().await.get(key.as_str()).cloned())
    }

    async fn list(&self) -> Result<Vec<E>, DomainError> {
        Ok(self.entities.read().await.values().cloned().collect())
    }

    async fn create(&self, entity: E) -> Result<E, DomainError> {
        let key = entity.key().as_str().to_string();
        let mut entities = self.entities.write().await;

        if entities.contains_key(&key) {
            return Err(DomainError::conflict(format!(
                "Entity with key '{}' already exists",
                key
            )));
        }

        entities.insert(key, entity.clone());
        Ok(entity)
    }

    async fn update(&self, entity: E) -> Result<E, DomainError> {
        let key = entity.key().as_str().to_string();
        let mut entities = self.entities.write().await;

        match entities.get_mut(&key) {
            Some(slot) => {
                *slot = entity.clone();
                Ok(entity)
            }
            None => Err(DomainError::not_found(format!(
                "Entity with key '{}' not found",
                key
            ))),
        }
    }

    async fn delete(&self, key: &E::Key) -> Result<bool, DomainError> {
        Ok(self.entities.write().await.remove(key.as_str()).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Api;

    #[tokio::test]
    async fn test_create_and_get() {
        let storage: InMemoryStorage<Api> = InMemoryStorage::new();
        let api = Api::new("payments").unwrap();

        storage.create(api.clone()).await.unwrap();

        let result = storage.get(&api.id).await.unwrap();
        assert_eq!(result, Some(api));
    }

    #[tokio::test]
    async fn test_create_conflict() {
        let storage: InMemoryStorage<Api> = InMemoryStorage::new();
        let api = Api::new("payments").unwrap();

        storage.create(api.clone()).await.unwrap();
        let result = storage.create(api).await;

        assert!(matches!(result, Err(DomainError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_update_not_found() {
        let storage: InMemoryStorage<Api> = InMemoryStorage::new();

        let result = storage.update(Api::new("payments").unwrap()).await;
        assert!(matches!(result, Err(DomainError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let storage: InMemoryStorage<Api> = InMemoryStorage::new();
        let mut api = storage.create(Api::new("payments").unwrap()).await.unwrap();

        api.name = "billing".to_string();
        storage.update(api.clone()).await.unwrap();
        assert_eq!(storage.get(&api.id).await.unwrap().unwrap().name, "billing");

        assert!(storage.delete(&api.id).await.unwrap());
        assert!(!storage.delete(&api.id).await.unwrap());
        assert!(storage.get(&api.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_and_filter() {
        let storage: InMemoryStorage<Api> = InMemoryStorage::new();
        storage.create(Api::new("a").unwrap()).await.unwrap();
        storage.create(Api::new("b").unwrap()).await.unwrap();
        storage.create(Api::new("b").unwrap()).await.unwrap();

        let found = storage.find(&|api: &Api| api.name == "a").await.unwrap();
        assert_eq!(found.unwrap().name, "a");

        let filtered = storage.filter(&|api: &Api| api.name == "b").await.unwrap();
        assert_eq!(filtered.len(), 2);
    }
}
