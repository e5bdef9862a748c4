//! Key management service

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::KeySettings;
use crate::domain::apis::ApiRepository;
use crate::domain::id::{ApiId, IdentityId, KeyId};
use crate::domain::key::{
    validate_permissions, validate_usage, Key, KeyRepository, Refill, RemainingOp,
};
use crate::domain::ratelimit::{validate_rules, RatelimitRule};
use crate::domain::DomainError;
use crate::infrastructure::identity::IdentityService;

use super::hasher::{GeneratedKey, KeyGenerator};

/// Parameters of a new key
#[derive(Debug, Clone)]
pub struct CreateKey {
    pub api_id: ApiId,
    pub prefix: Option<String>,
    pub byte_length: Option<usize>,
    pub name: Option<String>,
    pub owner_id: Option<String>,
    /// Binds the key to this identity, creating it on first use
    pub external_id: Option<String>,
    pub meta: Map<String, Value>,
    pub remaining: Option<i64>,
    pub refill: Option<Refill>,
    pub ratelimits: Vec<RatelimitRule>,
    pub permissions: Vec<String>,
    pub roles: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub enabled: bool,
}

impl CreateKey {
    pub fn new(api_id: ApiId) -> Self {
        Self {
            api_id,
            prefix: None,
            byte_length: None,
            name: None,
            owner_id: None,
            external_id: None,
            meta: Map::new(),
            remaining: None,
            refill: None,
            ratelimits: Vec::new(),
            permissions: Vec::new(),
            roles: Vec::new(),
            expires_at: None,
            enabled: true,
        }
    }
}

/// Partial key update
///
/// `None` leaves a field untouched; `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default)]
pub struct KeyUpdate {
    pub name: Option<Option<String>>,
    pub owner_id: Option<Option<String>>,
    pub external_id: Option<Option<String>>,
    pub meta: Option<Map<String, Value>>,
    pub remaining: Option<Option<i64>>,
    pub refill: Option<Option<Refill>>,
    pub ratelimits: Option<Vec<RatelimitRule>>,
    pub permissions: Option<Vec<String>>,
    pub roles: Option<Vec<String>>,
    pub expires_at: Option<Option<DateTime<Utc>>>,
    pub enabled: Option<bool>,
}

/// A stored key together with its plaintext secret
#[derive(Debug, Clone)]
pub struct CreatedKey {
    pub key: Key,
    pub secret: String,
}

pub struct KeyService {
    keys: Arc<dyn KeyRepository>,
    apis: Arc<dyn ApiRepository>,
    identities: Arc<IdentityService>,
    generator: KeyGenerator,
    default_prefix: String,
    default_byte_length: usize,
}

impl KeyService {
    pub fn new(
        keys: Arc<dyn KeyRepository>,
        apis: Arc<dyn ApiRepository>,
        identities: Arc<IdentityService>,
        generator: KeyGenerator,
    ) -> Self {
        let defaults = KeySettings::default();

        Self {
            keys,
            apis,
            identities,
            generator,
            default_prefix: defaults.default_prefix,
            default_byte_length: defaults.default_byte_length,
        }
    }

    pub fn with_defaults(mut self, settings: &KeySettings) -> Self {
        self.default_prefix = settings.default_prefix.clone();
        self.default_byte_length = settings.default_byte_length;
        self
    }

    /// Create a key with a random secret; the secret is only returned here
    pub async fn create_key(&self, request: CreateKey) -> Result<CreatedKey, DomainError> {
        let prefix = request.prefix.as_deref().unwrap_or(&self.default_prefix);
        let byte_length = request.byte_length.unwrap_or(self.default_byte_length);
        let generated = self.generator.generate(prefix, byte_length)?;

        self.store(request, generated).await
    }

    /// Create a key for a caller-chosen secret
    pub async fn create_key_with_secret(
        &self,
        request: CreateKey,
        secret: &str,
    ) -> Result<CreatedKey, DomainError> {
        if secret.is_empty() {
            return Err(DomainError::validation("Key cannot be empty"));
        }

        let generated = self.generator.from_secret(secret);
        self.store(request, generated).await
    }

    async fn store(
        &self,
        request: CreateKey,
        generated: GeneratedKey,
    ) -> Result<CreatedKey, DomainError> {
        self.require_live_api(&request.api_id).await?;

        validate_usage(request.remaining, request.refill.as_ref())?;
        validate_permissions(&request.permissions)?;
        validate_rules(&request.ratelimits)?;
        validate_expiry(request.expires_at)?;

        let identity_id = self.resolve_identity(request.external_id.as_deref()).await?;

        let key = Key::new(request.api_id, generated.hash, generated.start)
            .with_name(request.name)
            .with_owner_id(request.owner_id)
            .with_identity(identity_id)
            .with_meta(request.meta)
            .with_remaining(request.remaining)
            .with_refill(request.refill)
            .with_ratelimits(request.ratelimits)
            .with_permissions(request.permissions)
            .with_roles(request.roles)
            .with_enabled(request.enabled)
            .with_expires_at(request.expires_at);

        let key = self.keys.create(key).await?;
        info!(key_id = %key.id(), api_id = %key.api_id(), "Created key");

        Ok(CreatedKey {
            key,
            secret: generated.key,
        })
    }

    /// A key that has not been deleted
    pub async fn get_key(&self, id: &KeyId) -> Result<Key, DomainError> {
        self.keys
            .get(id)
            .await?
            .filter(|key| !key.is_deleted())
            .ok_or_else(|| DomainError::not_found(format!("Key '{}' not found", id)))
    }

    pub async fn list_keys(&self, api_id: &ApiId) -> Result<Vec<Key>, DomainError> {
        self.require_live_api(api_id).await?;
        self.keys.list_by_api(api_id).await
    }

    pub async fn update_key(&self, id: &KeyId, update: KeyUpdate) -> Result<Key, DomainError> {
        let mut key = self.get_key(id).await?;

        let remaining = update.remaining.unwrap_or(key.remaining());
        let refill = update.refill.unwrap_or(key.refill().copied());
        validate_usage(remaining, refill.as_ref())?;

        if let Some(name) = update.name {
            key.set_name(name);
        }
        if let Some(owner_id) = update.owner_id {
            key.set_owner_id(owner_id);
        }
        if let Some(external_id) = update.external_id {
            let identity_id = self.resolve_identity(external_id.as_deref()).await?;
            key.set_identity_id(identity_id);
        }
        if let Some(meta) = update.meta {
            key.set_meta(meta);
        }
        if update.refill.is_some() {
            key.set_refill(refill);
        }
        if let Some(ratelimits) = update.ratelimits {
            validate_rules(&ratelimits)?;
            key.set_ratelimits(ratelimits);
        }
        if let Some(permissions) = update.permissions {
            validate_permissions(&permissions)?;
            key.set_permissions(permissions);
        }
        if let Some(roles) = update.roles {
            key.set_roles(roles);
        }
        if let Some(expires_at) = update.expires_at {
            validate_expiry(expires_at)?;
            key.set_expires_at(expires_at);
        }
        if let Some(enabled) = update.enabled {
            key.set_enabled(enabled);
        }

        let mut key = self.keys.update(key).await?;

        if let Some(remaining) = update.remaining {
            let remaining = self.keys.update_remaining(id, RemainingOp::Set, remaining).await?;
            key.set_remaining(remaining);
        }

        info!(key_id = %id, "Updated key");
        Ok(key)
    }

    /// Soft delete; later verifications report NOT_FOUND
    pub async fn delete_key(&self, id: &KeyId) -> Result<(), DomainError> {
        if !self.keys.soft_delete(id, Utc::now()).await? {
            return Err(DomainError::not_found(format!("Key '{}' not found", id)));
        }

        info!(key_id = %id, "Deleted key");
        Ok(())
    }

    pub async fn update_remaining(
        &self,
        id: &KeyId,
        op: RemainingOp,
        value: Option<i64>,
    ) -> Result<Option<i64>, DomainError> {
        self.get_key(id).await?;

        let remaining = self.keys.update_remaining(id, op, value).await?;
        info!(key_id = %id, %op, ?value, ?remaining, "Updated key usage");

        Ok(remaining)
    }

    async fn require_live_api(&self, api_id: &ApiId) -> Result<(), DomainError> {
        match self.apis.get(api_id).await? {
            Some(api) if !api.is_deleted() => Ok(()),
            _ => Err(DomainError::not_found(format!("API '{}' not found", api_id))),
        }
    }

    async fn resolve_identity(
        &self,
        external_id: Option<&str>,
    ) -> Result<Option<IdentityId>, DomainError> {
        let Some(external_id) = external_id else {
            return Ok(None);
        };

        let identity = self.identities.find_or_create(external_id).await?;
        debug!(identity_id = %identity.id, "Resolved identity for key");

        Ok(Some(identity.id))
    }
}

fn validate_expiry(expires_at: Option<DateTime<Utc>>) -> Result<(), DomainError> {
    match expires_at {
        Some(at) if at <= Utc::now() => Err(DomainError::validation("expires must be in the future")),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::domain::apis::Api;
    use crate::domain::identity::Identity;
    use crate::domain::key::MockKeyRepository;
    use crate::infrastructure::apis::StorageApiRepository;
    use crate::infrastructure::identity::StorageIdentityRepository;
    use crate::infrastructure::key::{InMemoryKeyRepository, KeyHasher};
    use crate::infrastructure::storage::InMemoryStorage;

    struct Fixture {
        service: KeyService,
        keys: Arc<dyn KeyRepository>,
        api_id: ApiId,
    }

    async fn fixture_with(keys: Arc<dyn KeyRepository>) -> Fixture {
        let apis = Arc::new(StorageApiRepository::new(Arc::new(InMemoryStorage::<Api>::new())));
        let api = apis.create(Api::new("payments").unwrap()).await.unwrap();
        let identities = Arc::new(IdentityService::new(
            Arc::new(StorageIdentityRepository::new(Arc::new(
                InMemoryStorage::<Identity>::new(),
            ))),
            keys.clone(),
        ));

        Fixture {
            service: KeyService::new(keys.clone(), apis, identities, KeyGenerator::default()),
            keys,
            api_id: api.id,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(Arc::new(InMemoryKeyRepository::new())).await
    }

    #[tokio::test]
    async fn test_create_key_stores_only_hash() {
        let f = fixture().await;
        let created = f.service.create_key(CreateKey::new(f.api_id.clone())).await.unwrap();

        assert!(created.secret.starts_with("sk_"));
        assert_ne!(created.key.hash(), created.secret);
        assert!(created.secret.starts_with(created.key.start()));

        let hash = KeyHasher::sha256().hash(&created.secret);
        assert!(f.keys.find_by_hash(&hash).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_key_custom_prefix_and_length() {
        let f = fixture().await;
        let mut request = CreateKey::new(f.api_id.clone());
        request.prefix = Some("live".to_string());
        request.byte_length = Some(32);

        let created = f.service.create_key(request).await.unwrap();
        assert!(created.secret.starts_with("live_"));
        assert_eq!(created.secret.len(), 5 + 43);
    }

    #[tokio::test]
    async fn test_create_key_for_unknown_api() {
        let f = fixture().await;
        let result = f.service.create_key(CreateKey::new(ApiId::generate())).await;

        assert!(matches!(result, Err(DomainError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_create_key_validates_input() {
        let f = fixture().await;

        let mut request = CreateKey::new(f.api_id.clone());
        request.remaining = Some(-1);
        assert!(f.service.create_key(request).await.is_err());

        let mut request = CreateKey::new(f.api_id.clone());
        request.refill = Some(Refill::daily(10));
        assert!(f.service.create_key(request).await.is_err());

        let mut request = CreateKey::new(f.api_id.clone());
        request.byte_length = Some(8);
        assert!(f.service.create_key(request).await.is_err());

        let mut request = CreateKey::new(f.api_id.clone());
        request.expires_at = Some(Utc::now() - Duration::minutes(1));
        assert!(f.service.create_key(request).await.is_err());
    }

    #[tokio::test]
    async fn test_create_key_binds_identity() {
        let f = fixture().await;
        let mut request = CreateKey::new(f.api_id.clone());
        request.external_id = Some("user_1".to_string());
        let first = f.service.create_key(request.clone()).await.unwrap();
        let second = f.service.create_key(request).await.unwrap();

        assert!(first.key.identity_id().is_some());
        assert_eq!(first.key.identity_id(), second.key.identity_id());
    }

    #[tokio::test]
    async fn test_create_with_secret() {
        let f = fixture().await;
        let created = f
            .service
            .create_key_with_secret(CreateKey::new(f.api_id.clone()), "root_secret_value")
            .await
            .unwrap();

        assert_eq!(created.secret, "root_secret_value");
        assert_eq!(created.key.start(), "root_secr");
    }

    #[tokio::test]
    async fn test_update_key_partial() {
        let f = fixture().await;
        let mut request = CreateKey::new(f.api_id.clone());
        request.name = Some("original".to_string());
        request.remaining = Some(10);
        let created = f.service.create_key(request).await.unwrap();

        let update = KeyUpdate {
            owner_id: Some(Some("owner_1".to_string())),
            enabled: Some(false),
            remaining: Some(Some(3)),
            ..Default::default()
        };
        let updated = f.service.update_key(created.key.id(), update).await.unwrap();

        assert_eq!(updated.name(), Some("original"));
        assert_eq!(updated.owner_id(), Some("owner_1"));
        assert!(!updated.enabled());
        assert_eq!(updated.remaining(), Some(3));

        let cleared = KeyUpdate {
            name: Some(None),
            ..Default::default()
        };
        let updated = f.service.update_key(created.key.id(), cleared).await.unwrap();
        assert_eq!(updated.name(), None);
    }

    #[tokio::test]
    async fn test_update_key_rejects_refill_on_unlimited_key() {
        let f = fixture().await;
        let created = f.service.create_key(CreateKey::new(f.api_id.clone())).await.unwrap();

        let update = KeyUpdate {
            refill: Some(Some(Refill::daily(10))),
            ..Default::default()
        };
        let result = f.service.update_key(created.key.id(), update).await;
        assert!(matches!(result, Err(DomainError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_delete_key() {
        let f = fixture().await;
        let created = f.service.create_key(CreateKey::new(f.api_id.clone())).await.unwrap();

        f.service.delete_key(created.key.id()).await.unwrap();

        assert!(f.service.get_key(created.key.id()).await.is_err());
        assert!(f.service.list_keys(&f.api_id).await.unwrap().is_empty());
        assert!(matches!(
            f.service.delete_key(created.key.id()).await,
            Err(DomainError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_remaining_on_deleted_key() {
        let f = fixture().await;
        let mut request = CreateKey::new(f.api_id.clone());
        request.remaining = Some(0);
        let created = f.service.create_key(request).await.unwrap();

        assert_eq!(
            f.service
                .update_remaining(created.key.id(), RemainingOp::Increment, Some(5))
                .await
                .unwrap(),
            Some(5)
        );

        f.service.delete_key(created.key.id()).await.unwrap();
        let result = f
            .service
            .update_remaining(created.key.id(), RemainingOp::Increment, Some(5))
            .await;
        assert!(matches!(result, Err(DomainError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_storage_failure_propagates() {
        let mut keys = MockKeyRepository::new();
        keys.expect_create()
            .returning(|_| Err(DomainError::storage("connection refused")));

        let f = fixture_with(Arc::new(keys)).await;
        let result = f.service.create_key(CreateKey::new(f.api_id.clone())).await;

        assert!(matches!(result, Err(DomainError::Storage { .. })));
    }
}
