//! API service

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::domain::apis::{Api, ApiRepository};
use crate::domain::id::ApiId;
use crate::domain::DomainError;

pub struct ApiService {
    repository: Arc<dyn ApiRepository>,
}

impl ApiService {
    pub fn new(repository: Arc<dyn ApiRepository>) -> Self {
        Self { repository }
    }

    pub async fn create_api(&self, name: &str) -> Result<Api, DomainError> {
        let api = self.repository.create(Api::new(name)?).await?;
        info!(api_id = %api.id, name = %api.name, "Created API");
        Ok(api)
    }

    /// Create an API under a fixed id unless it already exists
    pub async fn ensure_api(&self, id: &ApiId, name: &str) -> Result<Api, DomainError> {
        if let Some(api) = self.repository.get(id).await? {
            return Ok(api);
        }

        let api = self.repository.create(Api::with_id(id.clone(), name)?).await?;
        info!(api_id = %api.id, "Created API");
        Ok(api)
    }

    /// A live API; deleted APIs are reported as missing
    pub async fn get_api(&self, id: &ApiId) -> Result<Api, DomainError> {
        self.repository
            .get(id)
            .await?
            .filter(|api| !api.is_deleted())
            .ok_or_else(|| DomainError::not_found(format!("API '{}' not found", id)))
    }

    /// Soft delete; keys of the API stop verifying
    pub async fn delete_api(&self, id: &ApiId) -> Result<(), DomainError> {
        let mut api = self.get_api(id).await?;
        api.deleted_at = Some(Utc::now());
        self.repository.update(api).await?;

        info!(api_id = %id, "Deleted API");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::apis::StorageApiRepository;
    use crate::infrastructure::storage::InMemoryStorage;

    fn service() -> ApiService {
        let storage = Arc::new(InMemoryStorage::<Api>::new());
        ApiService::new(Arc::new(StorageApiRepository::new(storage)))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let service = service();
        let api = service.create_api("payments").await.unwrap();

        let found = service.get_api(&api.id).await.unwrap();
        assert_eq!(found.name, "payments");
    }

    #[tokio::test]
    async fn test_create_rejects_empty_name() {
        let result = service().create_api("").await;
        assert!(matches!(result, Err(DomainError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_deleted_api_is_not_found() {
        let service = service();
        let api = service.create_api("payments").await.unwrap();

        service.delete_api(&api.id).await.unwrap();

        let result = service.get_api(&api.id).await;
        assert!(matches!(result, Err(DomainError::NotFound { .. })));
        assert!(service.delete_api(&api.id).await.is_err());
    }

    #[tokio::test]
    async fn test_ensure_api_is_idempotent() {
        let service = service();
        let id = ApiId::new("api_root").unwrap();

        let first = service.ensure_api(&id, "root").await.unwrap();
        let second = service.ensure_api(&id, "other").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "root");
    }
}
