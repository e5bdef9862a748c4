//! Storage-backed identity repository

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::id::IdentityId;
use crate::domain::identity::{Identity, IdentityRepository};
use crate::domain::storage::Storage;
use crate::domain::DomainError;

#[derive(Debug)]
pub struct StorageIdentityRepository {
    storage: Arc<dyn Storage<Identity>>,
}

impl StorageIdentityRepository {
    pub fn new(storage: Arc<dyn Storage<Identity>>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl IdentityRepository for StorageIdentityRepository {
    async fn get(&self, id: &IdentityId) -> Result<Option<Identity>, DomainError> {
        self.storage.get(id).await
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Identity>, DomainError> {
        self.storage.find(&|i: &Identity| i.external_id == external_id).await
    }

    async fn create(&self, identity: Identity) -> Result<Identity, DomainError> {
        if self.find_by_external_id(&identity.external_id).await?.is_some() {
            return Err(DomainError::conflict(format!(
                "Identity with externalId '{}' already exists",
                identity.external_id
            )));
        }

        self.storage.create(identity).await
    }

    async fn update(&self, identity: Identity) -> Result<Identity, DomainError> {
        self.storage.update(identity).await
    }

    async fn delete(&self, id: &IdentityId) -> Result<bool, DomainError> {
        self.storage.delete(id).await
    }
}
