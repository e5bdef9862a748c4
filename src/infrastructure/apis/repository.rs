//! Storage-backed API repository

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::apis::{Api, ApiRepository};
use crate::domain::id::ApiId;
use crate::domain::storage::Storage;
use crate::domain::DomainError;

#[derive(Debug)]
pub struct StorageApiRepository {
    storage: Arc<dyn Storage<Api>>,
}

impl StorageApiRepository {
    pub fn new(storage: Arc<dyn Storage<Api>>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ApiRepository for StorageApiRepository {
    async fn get(&self, id: &ApiId) -> Result<Option<Api>, DomainError> {
        self.storage.get(id).await
    }

    async fn create(&self, api: Api) -> Result<Api, DomainError> {
        self.storage.create(api).await
    }

    async fn update(&self, api: Api) -> Result<Api, DomainError> {
        self.storage.update(api).await
    }
}
