//! Standalone ratelimiting of arbitrary identifiers within a namespace

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::domain::id::NamespaceId;
use crate::domain::ratelimit::{
    select_override, validate_window, NamespaceRepository, OverrideRepository, RatelimitNamespace,
    RatelimitOverride, RatelimitRule,
};
use crate::domain::DomainError;

use super::evaluator::RatelimitEvaluator;

/// How a caller addresses a namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceRef {
    Id(NamespaceId),
    Name(String),
}

#[derive(Debug, Clone)]
pub struct LimitRequest {
    pub namespace: String,
    pub identifier: String,
    pub limit: i64,
    pub duration_ms: i64,
    pub cost: i64,
    pub is_async: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitResponse {
    pub success: bool,
    pub limit: i64,
    pub remaining: i64,
    /// Unix milliseconds at which the window resets
    pub reset: i64,
    pub override_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OverrideSpec {
    pub identifier: String,
    pub limit: i64,
    pub duration_ms: i64,
    pub is_async: bool,
}

pub struct RatelimitService {
    namespaces: Arc<dyn NamespaceRepository>,
    overrides: Arc<dyn OverrideRepository>,
    evaluator: Arc<RatelimitEvaluator>,
}

impl RatelimitService {
    pub fn new(
        namespaces: Arc<dyn NamespaceRepository>,
        overrides: Arc<dyn OverrideRepository>,
        evaluator: Arc<RatelimitEvaluator>,
    ) -> Self {
        Self {
            namespaces,
            overrides,
            evaluator,
        }
    }

    /// Resolve a namespace; unknown names are created when `create` is set
    pub async fn namespace(
        &self,
        reference: &NamespaceRef,
        create: bool,
    ) -> Result<RatelimitNamespace, DomainError> {
        let found = match reference {
            NamespaceRef::Id(id) => self.namespaces.get(id).await?,
            NamespaceRef::Name(name) => self.namespaces.find_by_name(name).await?,
        };

        match (found, reference) {
            (Some(namespace), _) => Ok(namespace),
            (None, NamespaceRef::Name(name)) if create => self.create_namespace(name).await,
            (None, _) => Err(DomainError::not_found("Namespace not found")),
        }
    }

    async fn create_namespace(&self, name: &str) -> Result<RatelimitNamespace, DomainError> {
        match self.namespaces.create(RatelimitNamespace::new(name)?).await {
            Ok(namespace) => {
                info!(namespace_id = %namespace.id, name, "Created ratelimit namespace");
                Ok(namespace)
            }
            Err(DomainError::Conflict { .. }) => self
                .namespaces
                .find_by_name(name)
                .await?
                .ok_or_else(|| DomainError::internal("Namespace vanished after conflict")),
            Err(e) => Err(e),
        }
    }

    /// Charge `identifier` in a namespace, applying the best matching override
    pub async fn limit(&self, request: LimitRequest) -> Result<LimitResponse, DomainError> {
        validate_window(request.limit, request.duration_ms)?;

        let namespace = self
            .namespace(&NamespaceRef::Name(request.namespace.clone()), true)
            .await?;
        let overrides = self.overrides.list_by_namespace(&namespace.id).await?;
        let applied = select_override(&overrides, &request.identifier);

        let rule = match applied {
            Some(o) => RatelimitRule::new(request.identifier.clone(), o.limit, o.duration_ms)
                .with_async(o.is_async),
            None => RatelimitRule::new(
                request.identifier.clone(),
                request.limit,
                request.duration_ms,
            )
            .with_async(request.is_async),
        };

        let result = self
            .evaluator
            .evaluate_rule(
                namespace.id.as_str(),
                &rule,
                request.cost,
                Utc::now().timestamp_millis(),
            )
            .await;

        Ok(LimitResponse {
            success: result.passed,
            limit: result.limit,
            remaining: result.remaining,
            reset: result.reset_at,
            override_id: applied.map(|o| o.id.to_string()),
        })
    }

    /// Create or replace the override for an identifier
    pub async fn set_override(
        &self,
        reference: &NamespaceRef,
        spec: OverrideSpec,
    ) -> Result<RatelimitOverride, DomainError> {
        let namespace = self.namespace(reference, true).await?;

        if let Some(mut existing) = self.overrides.find(&namespace.id, &spec.identifier).await? {
            validate_window(spec.limit, spec.duration_ms)?;
            existing.limit = spec.limit;
            existing.duration_ms = spec.duration_ms;
            existing.is_async = spec.is_async;
            existing.updated_at = Utc::now();

            let updated = self.overrides.update(existing).await?;
            info!(override_id = %updated.id, identifier = %updated.identifier, "Updated ratelimit override");
            return Ok(updated);
        }

        let item = RatelimitOverride::new(
            namespace.id.clone(),
            spec.identifier,
            spec.limit,
            spec.duration_ms,
        )?
        .with_async(spec.is_async);

        let created = self.overrides.create(item).await?;
        info!(override_id = %created.id, identifier = %created.identifier, "Created ratelimit override");

        Ok(created)
    }

    pub async fn get_override(
        &self,
        reference: &NamespaceRef,
        identifier: &str,
    ) -> Result<RatelimitOverride, DomainError> {
        let namespace = self.namespace(reference, false).await?;

        self.overrides
            .find(&namespace.id, identifier)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("Override for '{}' not found", identifier)))
    }

    pub async fn list_overrides(
        &self,
        reference: &NamespaceRef,
    ) -> Result<Vec<RatelimitOverride>, DomainError> {
        let namespace = self.namespace(reference, false).await?;
        self.overrides.list_by_namespace(&namespace.id).await
    }

    pub async fn delete_override(
        &self,
        reference: &NamespaceRef,
        identifier: &str,
    ) -> Result<(), DomainError> {
        let item = self.get_override(reference, identifier).await?;
        self.overrides.delete(&item.id).await?;

        info!(override_id = %item.id, identifier, "Deleted ratelimit override");
        Ok(())
    }
}
