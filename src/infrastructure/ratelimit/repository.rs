//! Storage-backed namespace and override repositories

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::id::{NamespaceId, OverrideId};
use crate::domain::ratelimit::{
    NamespaceRepository, OverrideRepository, RatelimitNamespace, RatelimitOverride,
};
use crate::domain::storage::Storage;
use crate::domain::DomainError;

#[derive(Debug)]
pub struct StorageNamespaceRepository {
    storage: Arc<dyn Storage<RatelimitNamespace>>,
}

impl StorageNamespaceRepository {
    pub fn new(storage: Arc<dyn Storage<RatelimitNamespace>>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl NamespaceRepository for StorageNamespaceRepository {
    async fn get(&self, id: &NamespaceId) -> Result<Option<RatelimitNamespace>, DomainError> {
        self.storage.get(id).await
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<RatelimitNamespace>, DomainError> {
        self.storage.find(&|ns: &RatelimitNamespace| ns.name == name).await
    }

    async fn create(
        &self,
        namespace: RatelimitNamespace,
    ) -> Result<RatelimitNamespace, DomainError> {
        if self.find_by_name(&namespace.name).await?.is_some() {
            return Err(DomainError::conflict(format!(
                "Namespace '{}' already exists",
                namespace.name
            )));
        }

        self.storage.create(namespace).await
    }
}

#[derive(Debug)]
pub struct StorageOverrideRepository {
    storage: Arc<dyn Storage<RatelimitOverride>>,
}

impl StorageOverrideRepository {
    pub fn new(storage: Arc<dyn Storage<RatelimitOverride>>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl OverrideRepository for StorageOverrideRepository {
    async fn find(
        &self,
        namespace_id: &NamespaceId,
        identifier: &str,
    ) -> Result<Option<RatelimitOverride>, DomainError> {
        self.storage
            .find(&|o: &RatelimitOverride| {
                &o.namespace_id == namespace_id && o.identifier == identifier
            })
            .await
    }

    async fn list_by_namespace(
        &self,
        namespace_id: &NamespaceId,
    ) -> Result<Vec<RatelimitOverride>, DomainError> {
        let mut overrides = self
            .storage
            .filter(&|o: &RatelimitOverride| &o.namespace_id == namespace_id)
            .await?;
        overrides.sort_by(|a, b| a.identifier.cmp(&b.identifier));

        Ok(overrides)
    }

    async fn create(&self, item: RatelimitOverride) -> Result<RatelimitOverride, DomainError> {
        if self.find(&item.namespace_id, &item.identifier).await?.is_some() {
            return Err(DomainError::conflict(format!(
                "Override for '{}' already exists",
                item.identifier
            )));
        }

        self.storage.create(item).await
    }

    async fn update(&self, item: RatelimitOverride) -> Result<RatelimitOverride, DomainError> {
        self.storage.update(item).await
    }

    async fn delete(&self, id: &OverrideId) -> Result<bool, DomainError> {
        self.storage.delete(id).await
    }
}
