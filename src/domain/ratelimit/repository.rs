//! Repository traits for ratelimit namespaces and overrides

use async_trait::async_trait;

use super::namespace::{RatelimitNamespace, RatelimitOverride};
use crate::domain::id::{NamespaceId, OverrideId};
use crate::domain::DomainError;

#[async_trait]
pub trait NamespaceRepository: Send + Sync {
    async fn get(&self, id: &NamespaceId) -> Result<Option<RatelimitNamespace>, DomainError>;

    async fn find_by_name(&self, name: &str) -> Result<Option<RatelimitNamespace>, DomainError>;

    /// Creates a namespace; fails with a conflict when the name is taken
    async fn create(&self, namespace: RatelimitNamespace)
        -> Result<RatelimitNamespace, DomainError>;
}

#[async_trait]
pub trait OverrideRepository: Send + Sync {
    async fn find(
        &self,
        namespace_id: &NamespaceId,
        identifier: &str,
    ) -> Result<Option<RatelimitOverride>, DomainError>;

    async fn list_by_namespace(
        &self,
        namespace_id: &NamespaceId,
    ) -> Result<Vec<RatelimitOverride>, DomainError>;

    async fn create(&self, item: RatelimitOverride) -> Result<RatelimitOverride, DomainError>;

    async fn update(&self, item: RatelimitOverride) -> Result<RatelimitOverride, DomainError>;

    async fn delete(&self, id: &OverrideId) -> Result<bool, DomainError>;
}
