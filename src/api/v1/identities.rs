//! Identity endpoints

use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

use crate::api::middleware::RootKey;
use crate::api::state::AppState;
use crate::api::types::{ApiError, Json, ValidatedJson};
use crate::domain::id::IdentityId;
use crate::domain::identity::Identity;
use crate::infrastructure::identity::IdentityLookup;

use super::{rules_from_body, rules_to_body, Empty, RatelimitRuleBody};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateIdentityRequest {
    #[validate(length(min = 1, max = 255, message = "externalId is required"))]
    pub external_id: String,
    #[serde(default)]
    pub meta: Map<String, Value>,
    #[serde(default)]
    pub ratelimits: Vec<RatelimitRuleBody>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIdentityResponse {
    pub identity_id: IdentityId,
}

pub async fn create_identity(
    State(state): State<AppState>,
    root: RootKey,
    ValidatedJson(request): ValidatedJson<CreateIdentityRequest>,
) -> Result<Json<CreateIdentityResponse>, ApiError> {
    root.require(&state, "identity.*.create_identity")?;

    let identity = state
        .identities
        .create_identity(
            &request.external_id,
            request.meta,
            rules_from_body(request.ratelimits),
        )
        .await?;

    Ok(Json(CreateIdentityResponse {
        identity_id: identity.id,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityView {
    pub id: IdentityId,
    pub external_id: String,
    pub meta: Map<String, Value>,
    pub ratelimits: Vec<RatelimitRuleBody>,
}

impl From<Identity> for IdentityView {
    fn from(identity: Identity) -> Self {
        Self {
            ratelimits: rules_to_body(&identity.ratelimits),
            id: identity.id,
            external_id: identity.external_id,
            meta: identity.meta,
        }
    }
}

/// Either `identityId` or `externalId`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityParams {
    pub identity_id: Option<IdentityId>,
    pub external_id: Option<String>,
}

impl IdentityParams {
    fn lookup(self) -> Result<IdentityLookup, ApiError> {
        match (self.identity_id, self.external_id) {
            (Some(id), None) => Ok(IdentityLookup::Id(id)),
            (None, Some(external_id)) => Ok(IdentityLookup::ExternalId(external_id)),
            _ => Err(ApiError::bad_request(
                "Provide exactly one of identityId or externalId",
            )),
        }
    }
}

pub async fn get_identity(
    State(state): State<AppState>,
    root: RootKey,
    Query(params): Query<IdentityParams>,
) -> Result<Json<IdentityView>, ApiError> {
    root.require(&state, "identity.*.read_identity")?;

    let identity = state.identities.get_identity(&params.lookup()?).await?;

    Ok(Json(identity.into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateIdentityRequest {
    #[serde(flatten)]
    pub identity: IdentityParams,
    pub meta: Option<Map<String, Value>>,
    pub ratelimits: Option<Vec<RatelimitRuleBody>>,
}

pub async fn update_identity(
    State(state): State<AppState>,
    root: RootKey,
    Json(request): Json<UpdateIdentityRequest>,
) -> Result<Json<IdentityView>, ApiError> {
    root.require(&state, "identity.*.update_identity")?;

    let identity = state
        .identities
        .update_identity(
            &request.identity.lookup()?,
            request.meta,
            request.ratelimits.map(rules_from_body),
        )
        .await?;

    Ok(Json(identity.into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteIdentityRequest {
    pub identity_id: IdentityId,
}

pub async fn delete_identity(
    State(state): State<AppState>,
    root: RootKey,
    Json(request): Json<DeleteIdentityRequest>,
) -> Result<Json<Empty>, ApiError> {
    root.require(&state, "identity.*.delete_identity")?;

    state.identities.delete_identity(&request.identity_id).await?;

    Ok(Json(Empty {}))
}
