//! Identity service

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::info;

use crate::domain::id::IdentityId;
use crate::domain::identity::{Identity, IdentityRepository};
use crate::domain::key::KeyRepository;
use crate::domain::ratelimit::RatelimitRule;
use crate::domain::DomainError;

/// How a caller addresses an identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityLookup {
    Id(IdentityId),
    ExternalId(String),
}

pub struct IdentityService {
    identities: Arc<dyn IdentityRepository>,
    keys: Arc<dyn KeyRepository>,
}

impl IdentityService {
    pub fn new(identities: Arc<dyn IdentityRepository>, keys: Arc<dyn KeyRepository>) -> Self {
        Self { identities, keys }
    }

    pub async fn create_identity(
        &self,
        external_id: &str,
        meta: Map<String, Value>,
        ratelimits: Vec<RatelimitRule>,
    ) -> Result<Identity, DomainError> {
        let identity = Identity::new(external_id)?
            .with_meta(meta)
            .with_ratelimits(ratelimits)?;

        let identity = self.identities.create(identity).await?;
        info!(identity_id = %identity.id, external_id = %identity.external_id, "Created identity");

        Ok(identity)
    }

    /// Identity for an external id, created on first use
    pub async fn find_or_create(&self, external_id: &str) -> Result<Identity, DomainError> {
        if let Some(identity) = self.identities.find_by_external_id(external_id).await? {
            return Ok(identity);
        }

        match self.identities.create(Identity::new(external_id)?).await {
            Ok(identity) => {
                info!(identity_id = %identity.id, external_id, "Created identity");
                Ok(identity)
            }
            // lost a race with a concurrent creator
            Err(DomainError::Conflict { .. }) => self
                .identities
                .find_by_external_id(external_id)
                .await?
                .ok_or_else(|| DomainError::internal("Identity vanished after conflict")),
            Err(e) => Err(e),
        }
    }

    pub async fn get_identity(&self, lookup: &IdentityLookup) -> Result<Identity, DomainError> {
        let found = match lookup {
            IdentityLookup::Id(id) => self.identities.get(id).await?,
            IdentityLookup::ExternalId(external_id) => {
                self.identities.find_by_external_id(external_id).await?
            }
        };

        found.ok_or_else(|| DomainError::not_found("Identity not found"))
    }

    /// Replace meta and/or the full rule set; omitted parts are kept
    pub async fn update_identity(
        &self,
        lookup: &IdentityLookup,
        meta: Option<Map<String, Value>>,
        ratelimits: Option<Vec<RatelimitRule>>,
    ) -> Result<Identity, DomainError> {
        let mut identity = self.get_identity(lookup).await?;

        if let Some(meta) = meta {
            identity.set_meta(meta);
        }

        if let Some(ratelimits) = ratelimits {
            identity.set_ratelimits(ratelimits)?;
        }

        let identity = self.identities.update(identity).await?;
        info!(identity_id = %identity.id, "Updated identity");

        Ok(identity)
    }

    /// Delete an identity and detach its keys
    pub async fn delete_identity(&self, id: &IdentityId) -> Result<(), DomainError> {
        if !self.identities.delete(id).await? {
            return Err(DomainError::not_found(format!("Identity '{}' not found", id)));
        }

        let unlinked = self.keys.unlink_identity(id).await?;
        info!(identity_id = %id, unlinked, "Deleted identity");

        Ok(())
    }
}
