//! Key verification
//!
//! A verification walks a fixed sequence of checks and stops at the first one
//! that fails. Every attempt that reaches a terminal code emits exactly one
//! [`VerificationEvent`]; backend failures surface as errors and never as a
//! valid result.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::analytics::AnalyticsSink;
use crate::domain::apis::ApiRepository;
use crate::domain::id::ApiId;
use crate::domain::identity::{Identity, IdentityRepository};
use crate::domain::key::{Key, KeyRepository, RemainingDecrement};
use crate::domain::ratelimit::{merge_rules, RatelimitRequest, RatelimitResult, RatelimitRule};
use crate::domain::verification::{
    Authorizer, PermissionQuery, VerificationCode, VerificationEvent,
};
use crate::domain::DomainError;
use crate::infrastructure::key::KeyHasher;
use crate::infrastructure::observability::record_verification;
use crate::infrastructure::ratelimit::RatelimitEvaluator;

/// A verification request
#[derive(Debug, Clone)]
pub struct VerifyKey {
    pub key: String,
    /// Restrict the key to this API
    pub api_id: Option<ApiId>,
    pub ratelimits: Vec<RatelimitRequest>,
    pub permissions: Option<PermissionQuery>,
    /// Usage consumed from `remaining` on success
    pub cost: i64,
}

impl VerifyKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            api_id: None,
            ratelimits: Vec::new(),
            permissions: None,
            cost: 1,
        }
    }

    pub fn with_api_id(mut self, api_id: ApiId) -> Self {
        self.api_id = Some(api_id);
        self
    }

    pub fn with_permissions(mut self, query: PermissionQuery) -> Self {
        self.permissions = Some(query);
        self
    }

    pub fn with_ratelimits(mut self, ratelimits: Vec<RatelimitRequest>) -> Self {
        self.ratelimits = ratelimits;
        self
    }

    pub fn with_cost(mut self, cost: i64) -> Self {
        self.cost = cost;
        self
    }
}

/// Result of a verification
///
/// `key` is only present once a live key was found.
#[derive(Debug, Clone)]
pub struct KeyVerification {
    pub code: VerificationCode,
    pub key: Option<Key>,
    pub identity: Option<Identity>,
    /// Usage left after this call; `None` for unlimited or unknown keys
    pub remaining: Option<i64>,
    pub ratelimits: Vec<RatelimitResult>,
}

impl KeyVerification {
    pub fn is_valid(&self) -> bool {
        self.code.is_valid()
    }

    fn not_found() -> Self {
        Self {
            code: VerificationCode::NotFound,
            key: None,
            identity: None,
            remaining: None,
            ratelimits: Vec::new(),
        }
    }
}

pub struct VerificationService {
    keys: Arc<dyn KeyRepository>,
    apis: Arc<dyn ApiRepository>,
    identities: Arc<dyn IdentityRepository>,
    evaluator: Arc<RatelimitEvaluator>,
    authorizer: Arc<dyn Authorizer>,
    sink: Arc<dyn AnalyticsSink>,
    hasher: KeyHasher,
}

impl VerificationService {
    pub fn new(
        keys: Arc<dyn KeyRepository>,
        apis: Arc<dyn ApiRepository>,
        identities: Arc<dyn IdentityRepository>,
        evaluator: Arc<RatelimitEvaluator>,
        authorizer: Arc<dyn Authorizer>,
        sink: Arc<dyn AnalyticsSink>,
        hasher: KeyHasher,
    ) -> Self {
        Self {
            keys,
            apis,
            identities,
            evaluator,
            authorizer,
            sink,
            hasher,
        }
    }

    pub fn authorizer(&self) -> &dyn Authorizer {
        self.authorizer.as_ref()
    }

    pub async fn verify(&self, request: VerifyKey) -> Result<KeyVerification, DomainError> {
        if request.key.is_empty() {
            return Err(DomainError::validation("key is required"));
        }
        if request.cost < 0 {
            return Err(DomainError::validation("cost cannot be negative"));
        }
        if let Some(r) = request.ratelimits.iter().find(|r| r.cost < 0) {
            return Err(DomainError::validation(format!(
                "ratelimit '{}' cost cannot be negative",
                r.name
            )));
        }

        let now = Utc::now();
        let hash = self.hasher.hash(&request.key);

        let Some(key) = self.keys.find_by_hash(&hash).await? else {
            self.emit(None, request.api_id.as_ref(), VerificationCode::NotFound, &request, now);
            return Ok(KeyVerification::not_found());
        };

        if key.is_deleted() || !self.api_is_live(key.api_id()).await? {
            self.emit(Some(&key), None, VerificationCode::NotFound, &request, now);
            return Ok(KeyVerification::not_found());
        }

        let mut verification = KeyVerification {
            code: VerificationCode::Valid,
            remaining: key.remaining(),
            key: None,
            identity: None,
            ratelimits: Vec::new(),
        };

        verification.code = self.check(&key, &request, now);
        if verification.code.is_valid() {
            self.consume(&key, &request, now, &mut verification).await?;
        }

        self.emit(Some(&key), None, verification.code, &request, now);
        verification.key = Some(key);

        Ok(verification)
    }

    /// Lifecycle and authorization checks; none of them touch counters
    fn check(&self, key: &Key, request: &VerifyKey, now: DateTime<Utc>) -> VerificationCode {
        if !key.enabled() {
            return VerificationCode::Disabled;
        }
        if key.is_expired_at(now) {
            return VerificationCode::Expired;
        }
        if request.api_id.as_ref().is_some_and(|id| id != key.api_id()) {
            return VerificationCode::Forbidden;
        }
        if let Some(query) = &request.permissions {
            if !self.authorizer.evaluate(key.permissions(), query) {
                return VerificationCode::InsufficientPermissions;
            }
        }

        VerificationCode::Valid
    }

    /// Identity, refill, ratelimits and usage, in that order
    async fn consume(
        &self,
        key: &Key,
        request: &VerifyKey,
        now: DateTime<Utc>,
        verification: &mut KeyVerification,
    ) -> Result<(), DomainError> {
        if let Some(id) = key.identity_id() {
            verification.identity = self.identities.get(id).await?;
        }

        if let (Some(refill), Some(period_start)) = (key.refill(), key.refill_due(now)) {
            let refilled = self
                .keys
                .refill(key.id(), refill.amount, period_start, now)
                .await?;

            if let Some(remaining) = refilled {
                debug!(key_id = %key.id(), remaining, "Refilled key");
                verification.remaining = Some(remaining);
            }
        }

        verification.ratelimits = self
            .evaluate_ratelimits(key, verification.identity.as_ref(), &request.ratelimits)
            .await;
        if verification.ratelimits.iter().any(|r| !r.passed) {
            verification.code = VerificationCode::RateLimited;
            return Ok(());
        }

        if verification.remaining.is_none() || request.cost == 0 {
            return Ok(());
        }

        match self.keys.decrement_remaining(key.id(), request.cost).await? {
            RemainingDecrement::Decremented { remaining } => {
                verification.remaining = Some(remaining);
            }
            RemainingDecrement::UsageExceeded { remaining } => {
                verification.code = VerificationCode::UsageExceeded;
                verification.remaining = Some(remaining);
            }
            RemainingDecrement::Unlimited => verification.remaining = None,
        }

        Ok(())
    }

    /// Key rules are counted per key, identity rules per identity so that every
    /// key of the identity shares them
    async fn evaluate_ratelimits(
        &self,
        key: &Key,
        identity: Option<&Identity>,
        requests: &[RatelimitRequest],
    ) -> Vec<RatelimitResult> {
        let mut results = self
            .evaluator
            .evaluate(key.id().as_str(), key.ratelimits(), requests)
            .await;

        if let Some(identity) = identity {
            let shared: Vec<RatelimitRule> = merge_rules(&identity.ratelimits, key.ratelimits())
                .into_iter()
                .filter(|rule| !key.ratelimits().iter().any(|k| k.name == rule.name))
                .collect();

            results.extend(
                self.evaluator
                    .evaluate(identity.id.as_str(), &shared, requests)
                    .await,
            );
        }

        results
    }

    async fn api_is_live(&self, api_id: &ApiId) -> Result<bool, DomainError> {
        Ok(self
            .apis
            .get(api_id)
            .await?
            .is_some_and(|api| !api.is_deleted()))
    }

    fn emit(
        &self,
        key: Option<&Key>,
        api_id: Option<&ApiId>,
        outcome: VerificationCode,
        request: &VerifyKey,
        now: DateTime<Utc>,
    ) {
        debug!(
            key_id = key.map(|k| k.id().as_str()),
            code = %outcome,
            "Verified key"
        );
        record_verification(outcome);

        self.sink.record(VerificationEvent {
            key_id: key.map(|k| k.id().clone()),
            api_id: key.map(|k| k.api_id()).or(api_id).cloned(),
            identity_id: key.and_then(|k| k.identity_id()).cloned(),
            outcome,
            cost: request.cost,
            time: now,
        });
    }
}
