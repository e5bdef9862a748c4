//! Identity domain
//!
//! An identity represents an external entity (user, organisation) that owns
//! keys. Its ratelimit rules are shared by all of its keys.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::id::IdentityId;
use crate::domain::ratelimit::{validate_rules, RatelimitRule};
use crate::domain::storage::StorageEntity;
use crate::domain::DomainError;

#[cfg(test)]
use mockall::automock;

/// Maximum length of an external id
pub const MAX_EXTERNAL_ID_LENGTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: IdentityId,
    /// Caller-chosen unique id, usually the user or organisation id in their system
    pub external_id: String,
    #[serde(default)]
    pub meta: Map<String, Value>,
    #[serde(default)]
    pub ratelimits: Vec<RatelimitRule>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Identity {
    pub fn new(external_id: impl Into<String>) -> Result<Self, DomainError> {
        let external_id = external_id.into();

        if external_id.trim().is_empty() {
            return Err(DomainError::validation("externalId cannot be empty"));
        }

        if external_id.len() > MAX_EXTERNAL_ID_LENGTH {
            return Err(DomainError::validation(format!(
                "externalId exceeds maximum length of {} characters",
                MAX_EXTERNAL_ID_LENGTH
            )));
        }

        let now = Utc::now();

        Ok(Self {
            id: IdentityId::generate(),
            external_id,
            meta: Map::new(),
            ratelimits: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_ratelimits(mut self, ratelimits: Vec<RatelimitRule>) -> Result<Self, DomainError> {
        validate_rules(&ratelimits)?;
        self.ratelimits = ratelimits;
        Ok(self)
    }

    pub fn set_meta(&mut self, meta: Map<String, Value>) {
        self.meta = meta;
        self.updated_at = Utc::now();
    }

    /// Replace the identity's rules; rules not listed are removed
    pub fn set_ratelimits(&mut self, ratelimits: Vec<RatelimitRule>) -> Result<(), DomainError> {
        validate_rules(&ratelimits)?;
        self.ratelimits = ratelimits;
        self.updated_at = Utc::now();
        Ok(())
    }
}

impl StorageEntity for Identity {
    type Key = IdentityId;

    const TABLE: &'static str = "identities";

    fn key(&self) -> &Self::Key {
        &self.id
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait IdentityRepository: Send + Sync {
    async fn get(&self, id: &IdentityId) -> Result<Option<Identity>, DomainError>;

    async fn find_by_external_id(&self, external_id: &str)
        -> Result<Option<Identity>, DomainError>;

    /// Create an identity; fails with a conflict when the external id is taken
    async fn create(&self, identity: Identity) -> Result<Identity, DomainError>;

    async fn update(&self, identity: Identity) -> Result<Identity, DomainError>;

    async fn delete(&self, id: &IdentityId) -> Result<bool, DomainError>;
}
