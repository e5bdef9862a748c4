//! Key endpoints

use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

use crate::api::middleware::RootKey;
use crate::api::state::AppState;
use crate::api::types::{nullable, ApiError, Json, ValidatedJson};
use crate::domain::id::{ApiId, IdentityId, KeyId};
use crate::domain::key::{Key, Refill, RemainingOp};
use crate::domain::ratelimit::{RatelimitRequest, RatelimitResult};
use crate::domain::verification::{PermissionQuery, VerificationCode};
use crate::infrastructure::key::{CreateKey, KeyUpdate};
use crate::infrastructure::verification::{KeyVerification, VerifyKey};

use super::{from_millis, rules_from_body, rules_to_body, Empty, RatelimitRuleBody};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyKeyRequest {
    pub key: String,
    pub api_id: Option<ApiId>,
    #[serde(default)]
    pub ratelimits: Vec<RatelimitRequest>,
    pub authorization: Option<AuthorizationBody>,
    pub remaining: Option<RemainingCost>,
}

#[derive(Debug, Deserialize)]
pub struct AuthorizationBody {
    pub permissions: PermissionQuery,
}

#[derive(Debug, Deserialize)]
pub struct RemainingCost {
    pub cost: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentitySummary {
    pub id: IdentityId,
    pub external_id: String,
    pub meta: Map<String, Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyKeyResponse {
    pub valid: bool,
    pub code: VerificationCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<KeyId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
    /// Unix milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<i64>,
    pub remaining: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ratelimits: Vec<RatelimitResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentitySummary>,
}

impl From<KeyVerification> for VerifyKeyResponse {
    fn from(verification: KeyVerification) -> Self {
        let valid = verification.is_valid();
        let key = verification.key;

        Self {
            valid,
            code: verification.code,
            key_id: key.as_ref().map(|k| k.id().clone()),
            name: key.as_ref().and_then(|k| k.name().map(str::to_string)),
            owner_id: key.as_ref().and_then(|k| k.owner_id().map(str::to_string)),
            meta: key.as_ref().map(|k| k.meta().clone()),
            expires: key
                .as_ref()
                .and_then(|k| k.expires_at())
                .map(|at| at.timestamp_millis()),
            remaining: verification.remaining,
            ratelimits: verification.ratelimits,
            enabled: key.as_ref().map(|k| k.enabled()),
            permissions: key.as_ref().map(|k| k.permissions().to_vec()),
            identity: verification.identity.map(|identity| IdentitySummary {
                id: identity.id,
                external_id: identity.external_id,
                meta: identity.meta,
            }),
        }
    }
}

/// Policy outcomes are reported with HTTP 200; only malformed requests and
/// backend failures produce error responses
pub async fn verify_key(
    State(state): State<AppState>,
    Json(request): Json<VerifyKeyRequest>,
) -> Result<Json<VerifyKeyResponse>, ApiError> {
    let mut verify = VerifyKey::new(request.key)
        .with_ratelimits(request.ratelimits)
        .with_cost(request.remaining.map_or(1, |r| r.cost));
    verify.api_id = request.api_id;
    verify.permissions = request.authorization.map(|a| a.permissions);

    let verification = state.verification.verify(verify).await?;

    Ok(Json(verification.into()))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateKeyRequest {
    pub api_id: ApiId,
    pub prefix: Option<String>,
    pub byte_length: Option<usize>,
    #[validate(length(max = 255))]
    pub name: Option<String>,
    #[validate(length(max = 255))]
    pub owner_id: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub external_id: Option<String>,
    #[serde(default)]
    pub meta: Map<String, Value>,
    #[validate(range(min = 0))]
    pub remaining: Option<i64>,
    pub refill: Option<Refill>,
    #[serde(default)]
    pub ratelimits: Vec<RatelimitRuleBody>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Unix milliseconds
    pub expires: Option<i64>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKeyResponse {
    pub key_id: KeyId,
    pub key: String,
}

pub async fn create_key(
    State(state): State<AppState>,
    root: RootKey,
    ValidatedJson(request): ValidatedJson<CreateKeyRequest>,
) -> Result<Json<CreateKeyResponse>, ApiError> {
    root.require(&state, &format!("api.{}.create_key", request.api_id))?;

    let mut create = CreateKey::new(request.api_id);
    create.prefix = request.prefix;
    create.byte_length = request.byte_length;
    create.name = request.name;
    create.owner_id = request.owner_id;
    create.external_id = request.external_id;
    create.meta = request.meta;
    create.remaining = request.remaining;
    create.refill = request.refill;
    create.ratelimits = rules_from_body(request.ratelimits);
    create.permissions = request.permissions;
    create.roles = request.roles;
    create.expires_at = request
        .expires
        .map(|ms| from_millis("expires", ms))
        .transpose()?;
    create.enabled = request.enabled.unwrap_or(true);

    let created = state.keys.create_key(create).await?;

    Ok(Json(CreateKeyResponse {
        key_id: created.key.id().clone(),
        key: created.secret,
    }))
}

/// Stored key as returned by the management endpoints; never includes the secret
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyView {
    pub id: KeyId,
    pub api_id: ApiId,
    pub start: String,
    pub name: Option<String>,
    pub owner_id: Option<String>,
    pub identity_id: Option<IdentityId>,
    pub meta: Map<String, Value>,
    pub remaining: Option<i64>,
    pub refill: Option<Refill>,
    pub last_refill_at: Option<i64>,
    pub ratelimits: Vec<RatelimitRuleBody>,
    pub permissions: Vec<String>,
    pub roles: Vec<String>,
    pub enabled: bool,
    pub expires: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&Key> for KeyView {
    fn from(key: &Key) -> Self {
        Self {
            id: key.id().clone(),
            api_id: key.api_id().clone(),
            start: key.start().to_string(),
            name: key.name().map(str::to_string),
            owner_id: key.owner_id().map(str::to_string),
            identity_id: key.identity_id().cloned(),
            meta: key.meta().clone(),
            remaining: key.remaining(),
            refill: key.refill().copied(),
            last_refill_at: key.last_refill_at().map(|at| at.timestamp_millis()),
            ratelimits: rules_to_body(key.ratelimits()),
            permissions: key.permissions().to_vec(),
            roles: key.roles().to_vec(),
            enabled: key.enabled(),
            expires: key.expires_at().map(|at| at.timestamp_millis()),
            created_at: key.created_at().timestamp_millis(),
            updated_at: key.updated_at().timestamp_millis(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyIdQuery {
    pub key_id: KeyId,
}

pub async fn get_key(
    State(state): State<AppState>,
    root: RootKey,
    Query(query): Query<KeyIdQuery>,
) -> Result<Json<KeyView>, ApiError> {
    let key = state.keys.get_key(&query.key_id).await?;
    root.require(&state, &format!("api.{}.read_key", key.api_id()))?;

    Ok(Json(KeyView::from(&key)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateKeyRequest {
    pub key_id: KeyId,
    #[serde(default, deserialize_with = "nullable")]
    pub name: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub owner_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub external_id: Option<Option<String>>,
    pub meta: Option<Map<String, Value>>,
    #[serde(default, deserialize_with = "nullable")]
    pub remaining: Option<Option<i64>>,
    #[serde(default, deserialize_with = "nullable")]
    pub refill: Option<Option<Refill>>,
    pub ratelimits: Option<Vec<RatelimitRuleBody>>,
    pub permissions: Option<Vec<String>>,
    pub roles: Option<Vec<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub expires: Option<Option<i64>>,
    pub enabled: Option<bool>,
}

pub async fn update_key(
    State(state): State<AppState>,
    root: RootKey,
    Json(request): Json<UpdateKeyRequest>,
) -> Result<Json<KeyView>, ApiError> {
    let key = state.keys.get_key(&request.key_id).await?;
    root.require(&state, &format!("api.{}.update_key", key.api_id()))?;

    let expires_at = match request.expires {
        Some(Some(ms)) => Some(Some(from_millis("expires", ms)?)),
        Some(None) => Some(None),
        None => None,
    };

    let update = KeyUpdate {
        name: request.name,
        owner_id: request.owner_id,
        external_id: request.external_id,
        meta: request.meta,
        remaining: request.remaining,
        refill: request.refill,
        ratelimits: request.ratelimits.map(rules_from_body),
        permissions: request.permissions,
        roles: request.roles,
        expires_at,
        enabled: request.enabled,
    };

    let key = state.keys.update_key(&request.key_id, update).await?;

    Ok(Json(KeyView::from(&key)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteKeyRequest {
    pub key_id: KeyId,
}

pub async fn delete_key(
    State(state): State<AppState>,
    root: RootKey,
    Json(request): Json<DeleteKeyRequest>,
) -> Result<Json<Empty>, ApiError> {
    let key = state.keys.get_key(&request.key_id).await?;
    root.require(&state, &format!("api.{}.delete_key", key.api_id()))?;

    state.keys.delete_key(&request.key_id).await?;

    Ok(Json(Empty {}))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRemainingRequest {
    pub key_id: KeyId,
    pub op: RemainingOp,
    pub value: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct UpdateRemainingResponse {
    pub remaining: Option<i64>,
}

pub async fn update_remaining(
    State(state): State<AppState>,
    root: RootKey,
    Json(request): Json<UpdateRemainingRequest>,
) -> Result<Json<UpdateRemainingResponse>, ApiError> {
    let key = state.keys.get_key(&request.key_id).await?;
    root.require(&state, &format!("api.{}.update_key", key.api_id()))?;

    let remaining = state
        .keys
        .update_remaining(&request.key_id, request.op, request.value)
        .await?;

    Ok(Json(UpdateRemainingResponse { remaining }))
}
