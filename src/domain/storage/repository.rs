//! Storage trait definition

use std::fmt::Debug;

use async_trait::async_trait;

use crate::domain::DomainError;

use super::entity::StorageEntity;

/// Generic document storage for the small management entities
/// (APIs, identities, ratelimit namespaces and overrides)
#[async_trait]
pub trait Storage<E>: Send + Sync + Debug
where
    E: StorageEntity + 'static,
{
    async fn get(&self, key: &E::Key) -> Result<Option<E>, DomainError>;

    async fn list(&self) -> Result<Vec<E>, DomainError>;

    /// Creates a new entity, returns a conflict error if the key is taken
    async fn create(&self, entity: E) -> Result<E, DomainError>;

    /// Updates an existing entity, returns a not found error if missing
    async fn update(&self, entity: E) -> Result<E, DomainError>;

    /// Deletes an entity by its key, returns true if it existed
    async fn delete(&self, key: &E::Key) -> Result<bool, DomainError>;

    /// Returns the first entity matching the predicate
    async fn find(
        &self,
        predicate: &(dyn for<'e> Fn(&'e E) -> bool + Send + Sync),
    ) -> Result<Option<E>, DomainError> {
        Ok(self.list().await?.into_iter().find(|e| predicate(e)))
    }

    /// Returns every entity matching the predicate
    async fn filter(
        &self,
        predicate: &(dyn for<'e> Fn(&'e E) -> bool + Send + Sync),
    ) -> Result<Vec<E>, DomainError> {
        Ok(self.list().await?.into_iter().filter(|e| predicate(e)).collect())
    }
}
