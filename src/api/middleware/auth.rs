//! Root key authentication
//!
//! Management endpoints take a root key, which is an ordinary key of the root
//! API, as `Authorization: Bearer <key>`. The key is verified like any other key
//! and its permissions decide what the caller may do.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use tracing::debug;

use crate::api::state::AppState;
use crate::api::types::ApiError;
use crate::domain::id::KeyId;
use crate::domain::verification::VerificationCode;
use crate::infrastructure::verification::VerifyKey;

/// An authenticated root key
#[derive(Debug, Clone)]
pub struct RootKey {
    pub key_id: KeyId,
    pub permissions: Vec<String>,
}

impl RootKey {
    /// Fail with `FORBIDDEN` unless the key grants `permission`
    pub fn require(&self, state: &AppState, permission: &str) -> Result<(), ApiError> {
        if state
            .verification
            .authorizer()
            .is_granted(&self.permissions, permission)
        {
            return Ok(());
        }

        debug!(key_id = %self.key_id, permission, "Root key lacks permission");
        Err(ApiError::forbidden(format!(
            "Missing permission '{}'",
            permission
        )))
    }
}

impl FromRequestParts<AppState> for RootKey {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)?;

        let verification = state
            .verification
            .verify(VerifyKey::new(token).with_api_id(state.root_api_id.clone()))
            .await?;

        match (verification.code, verification.key) {
            (VerificationCode::Valid, Some(key)) => Ok(RootKey {
                key_id: key.id().clone(),
                permissions: key.permissions().to_vec(),
            }),
            (VerificationCode::RateLimited | VerificationCode::UsageExceeded, _) => {
                Err(ApiError::rate_limited("Root key is rate limited"))
            }
            (code, _) => {
                debug!(code = %code, "Rejected root key");
                Err(ApiError::unauthorized("Invalid root key"))
            }
        }
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<String, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ApiError::unauthorized("Root key required. Provide 'Authorization: Bearer <key>'"))?;

    let value = value
        .to_str()
        .map_err(|_| ApiError::unauthorized("Invalid Authorization header encoding"))?;

    let token = value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Authorization header must use the Bearer scheme"))?;

    Ok(token.to_string())
}
