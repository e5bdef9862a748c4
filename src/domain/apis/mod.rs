//! API domain - a named group of keys
//!
//! Keys always belong to exactly one API. Deleting an API is a soft delete;
//! keys of a deleted API stop verifying.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::id::ApiId;
use crate::domain::storage::StorageEntity;
use crate::domain::DomainError;

/// Maximum length of an API name
pub const MAX_API_NAME_LENGTH: usize = 128;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Api {
    pub id: ApiId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Api {
    pub fn new(name: impl Into<String>) -> Result<Self, DomainError> {
        Self::with_id(ApiId::generate(), name)
    }

    pub fn with_id(id: ApiId, name: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into();

        if name.trim().is_empty() {
            return Err(DomainError::validation("API name cannot be empty"));
        }

        if name.len() > MAX_API_NAME_LENGTH {
            return Err(DomainError::validation(format!(
                "API name exceeds maximum length of {} characters",
                MAX_API_NAME_LENGTH
            )));
        }

        Ok(Self {
            id,
            name,
            created_at: Utc::now(),
            deleted_at: None,
        })
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl StorageEntity for Api {
    type Key = ApiId;

    const TABLE: &'static str = "apis";

    fn key(&self) -> &Self::Key {
        &self.id
    }
}

#[async_trait]
pub trait ApiRepository: Send + Sync {
    async fn get(&self, id: &ApiId) -> Result<Option<Api>, DomainError>;

    async fn create(&self, api: Api) -> Result<Api, DomainError>;

    async fn update(&self, api: Api) -> Result<Api, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_api() {
        let api = Api::new("payments").unwrap();
        assert!(api.id.as_str().starts_with("api_"));
        assert!(!api.is_deleted());
    }

    #[test]
    fn test_api_name_validation() {
        assert!(Api::new("").is_err());
        assert!(Api::new("x".repeat(MAX_API_NAME_LENGTH + 1)).is_err());
    }
}
