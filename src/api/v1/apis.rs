//! API endpoints

use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::api::middleware::RootKey;
use crate::api::state::AppState;
use crate::api::types::{ApiError, Json, ValidatedJson};
use crate::domain::apis::Api;
use crate::domain::id::ApiId;

use super::keys::KeyView;
use super::Empty;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateApiRequest {
    #[validate(length(min = 1, max = 255, message = "name is required"))]
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApiResponse {
    pub api_id: ApiId,
}

pub async fn create_api(
    State(state): State<AppState>,
    root: RootKey,
    ValidatedJson(request): ValidatedJson<CreateApiRequest>,
) -> Result<Json<CreateApiResponse>, ApiError> {
    root.require(&state, "api.*.create_api")?;

    let api = state.apis.create_api(&request.name).await?;

    Ok(Json(CreateApiResponse { api_id: api.id }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiView {
    pub id: ApiId,
    pub name: String,
    pub created_at: i64,
}

impl From<Api> for ApiView {
    fn from(api: Api) -> Self {
        Self {
            id: api.id,
            name: api.name,
            created_at: api.created_at.timestamp_millis(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiIdParams {
    pub api_id: ApiId,
}

pub async fn get_api(
    State(state): State<AppState>,
    root: RootKey,
    Query(query): Query<ApiIdParams>,
) -> Result<Json<ApiView>, ApiError> {
    root.require(&state, &format!("api.{}.read_api", query.api_id))?;

    let api = state.apis.get_api(&query.api_id).await?;

    Ok(Json(api.into()))
}

#[derive(Debug, Serialize)]
pub struct ListKeysResponse {
    pub keys: Vec<KeyView>,
    pub total: usize,
}

pub async fn list_keys(
    State(state): State<AppState>,
    root: RootKey,
    Query(query): Query<ApiIdParams>,
) -> Result<Json<ListKeysResponse>, ApiError> {
    root.require(&state, &format!("api.{}.read_key", query.api_id))?;

    let keys: Vec<KeyView> = state
        .keys
        .list_keys(&query.api_id)
        .await?
        .iter()
        .map(KeyView::from)
        .collect();

    Ok(Json(ListKeysResponse {
        total: keys.len(),
        keys,
    }))
}

pub async fn delete_api(
    State(state): State<AppState>,
    root: RootKey,
    Json(request): Json<ApiIdParams>,
) -> Result<Json<Empty>, ApiError> {
    root.require(&state, &format!("api.{}.delete_api", request.api_id))?;

    if request.api_id == state.root_api_id {
        return Err(ApiError::bad_request("The root API cannot be deleted"));
    }

    state.apis.delete_api(&request.api_id).await?;

    Ok(Json(Empty {}))
}
