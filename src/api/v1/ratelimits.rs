//! Standalone ratelimit endpoints

use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::api::middleware::RootKey;
use crate::api::state::AppState;
use crate::api::types::{ApiError, Json, ValidatedJson};
use crate::domain::id::{NamespaceId, OverrideId};
use crate::domain::ratelimit::RatelimitOverride;
use crate::infrastructure::ratelimit::{LimitRequest, NamespaceRef, OverrideSpec};

use super::Empty;

fn default_cost() -> i64 {
    1
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LimitBody {
    #[validate(length(min = 1, max = 128))]
    pub namespace: String,
    #[validate(length(min = 1, max = 255))]
    pub identifier: String,
    pub limit: i64,
    /// Window length in milliseconds
    pub duration: i64,
    #[serde(default = "default_cost")]
    #[validate(range(min = 0))]
    pub cost: i64,
    #[serde(default, rename = "async")]
    pub is_async: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitResult {
    pub success: bool,
    pub limit: i64,
    pub remaining: i64,
    pub reset: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_id: Option<String>,
}

pub async fn limit(
    State(state): State<AppState>,
    root: RootKey,
    ValidatedJson(body): ValidatedJson<LimitBody>,
) -> Result<Json<LimitResult>, ApiError> {
    root.require(&state, &format!("ratelimit.{}.limit", body.namespace))?;

    let response = state
        .ratelimits
        .limit(LimitRequest {
            namespace: body.namespace,
            identifier: body.identifier,
            limit: body.limit,
            duration_ms: body.duration,
            cost: body.cost,
            is_async: body.is_async,
        })
        .await?;

    Ok(Json(LimitResult {
        success: response.success,
        limit: response.limit,
        remaining: response.remaining,
        reset: response.reset,
        override_id: response.override_id,
    }))
}

/// Either `namespaceId` or `namespaceName`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceParams {
    pub namespace_id: Option<NamespaceId>,
    pub namespace_name: Option<String>,
}

impl NamespaceParams {
    fn reference(self) -> Result<NamespaceRef, ApiError> {
        match (self.namespace_id, self.namespace_name) {
            (Some(id), None) => Ok(NamespaceRef::Id(id)),
            (None, Some(name)) => Ok(NamespaceRef::Name(name)),
            _ => Err(ApiError::bad_request(
                "Provide exactly one of namespaceId or namespaceName",
            )),
        }
    }
}

/// Permission scope for a namespace, as addressed by the caller
fn scope(reference: &NamespaceRef) -> &str {
    match reference {
        NamespaceRef::Id(id) => id.as_str(),
        NamespaceRef::Name(name) => name,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetOverrideRequest {
    #[serde(flatten)]
    pub namespace: NamespaceParams,
    pub identifier: String,
    pub limit: i64,
    pub duration: i64,
    #[serde(default, rename = "async")]
    pub is_async: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetOverrideResponse {
    pub override_id: OverrideId,
}

pub async fn set_override(
    State(state): State<AppState>,
    root: RootKey,
    Json(request): Json<SetOverrideRequest>,
) -> Result<Json<SetOverrideResponse>, ApiError> {
    let reference = request.namespace.reference()?;
    root.require(&state, &format!("ratelimit.{}.set_override", scope(&reference)))?;

    let item = state
        .ratelimits
        .set_override(
            &reference,
            OverrideSpec {
                identifier: request.identifier,
                limit: request.limit,
                duration_ms: request.duration,
                is_async: request.is_async,
            },
        )
        .await?;

    Ok(Json(SetOverrideResponse {
        override_id: item.id,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideView {
    pub id: OverrideId,
    pub namespace_id: NamespaceId,
    pub identifier: String,
    pub limit: i64,
    pub duration: i64,
    #[serde(rename = "async")]
    pub is_async: bool,
}

impl From<RatelimitOverride> for OverrideView {
    fn from(item: RatelimitOverride) -> Self {
        Self {
            id: item.id,
            namespace_id: item.namespace_id,
            identifier: item.identifier,
            limit: item.limit,
            duration: item.duration_ms,
            is_async: item.is_async,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideParams {
    #[serde(flatten)]
    pub namespace: NamespaceParams,
    pub identifier: String,
}

pub async fn get_override(
    State(state): State<AppState>,
    root: RootKey,
    Query(params): Query<OverrideParams>,
) -> Result<Json<OverrideView>, ApiError> {
    let reference = params.namespace.reference()?;
    root.require(&state, &format!("ratelimit.{}.read_override", scope(&reference)))?;

    let item = state
        .ratelimits
        .get_override(&reference, &params.identifier)
        .await?;

    Ok(Json(item.into()))
}

#[derive(Debug, Serialize)]
pub struct ListOverridesResponse {
    pub overrides: Vec<OverrideView>,
    pub total: usize,
}

pub async fn list_overrides(
    State(state): State<AppState>,
    root: RootKey,
    Query(params): Query<NamespaceParams>,
) -> Result<Json<ListOverridesResponse>, ApiError> {
    let reference = params.reference()?;
    root.require(&state, &format!("ratelimit.{}.read_override", scope(&reference)))?;

    let overrides: Vec<OverrideView> = state
        .ratelimits
        .list_overrides(&reference)
        .await?
        .into_iter()
        .map(OverrideView::from)
        .collect();

    Ok(Json(ListOverridesResponse {
        total: overrides.len(),
        overrides,
    }))
}

pub async fn delete_override(
    State(state): State<AppState>,
    root: RootKey,
    Json(request): Json<OverrideParams>,
) -> Result<Json<Empty>, ApiError> {
    let reference = request.namespace.reference()?;
    root.require(&state, &format!("ratelimit.{}.delete_override", scope(&reference)))?;

    state
        .ratelimits
        .delete_override(&reference, &request.identifier)
        .await?;

    Ok(Json(Empty {}))
}
