//! v1 RPC-style endpoints: `/v1/<resource>.<action>`

pub mod analytics;
pub mod apis;
pub mod identities;
pub mod keys;
pub mod ratelimits;

use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::types::ApiError;
use crate::domain::ratelimit::RatelimitRule;

use super::state::AppState;

pub fn create_v1_router() -> Router<AppState> {
    Router::new()
        .route("/keys.verifyKey", post(keys::verify_key))
        .route("/keys.createKey", post(keys::create_key))
        .route("/keys.getKey", get(keys::get_key))
        .route("/keys.updateKey", post(keys::update_key))
        .route("/keys.deleteKey", post(keys::delete_key))
        .route("/keys.updateRemaining", post(keys::update_remaining))
        .route("/apis.createApi", post(apis::create_api))
        .route("/apis.getApi", get(apis::get_api))
        .route("/apis.listKeys", get(apis::list_keys))
        .route("/apis.deleteApi", post(apis::delete_api))
        .route("/identities.createIdentity", post(identities::create_identity))
        .route("/identities.getIdentity", get(identities::get_identity))
        .route("/identities.updateIdentity", post(identities::update_identity))
        .route("/identities.deleteIdentity", post(identities::delete_identity))
        .route("/ratelimits.limit", post(ratelimits::limit))
        .route("/ratelimits.setOverride", post(ratelimits::set_override))
        .route("/ratelimits.getOverride", get(ratelimits::get_override))
        .route("/ratelimits.listOverrides", get(ratelimits::list_overrides))
        .route("/ratelimits.deleteOverride", post(ratelimits::delete_override))
        .route("/analytics.getVerifications", get(analytics::get_verifications))
}

/// Ratelimit rule as exchanged over HTTP; `duration` is in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatelimitRuleBody {
    pub name: String,
    pub limit: i64,
    pub duration: i64,
    #[serde(default)]
    pub auto_apply: bool,
    #[serde(default, rename = "async")]
    pub is_async: bool,
}

impl From<RatelimitRuleBody> for RatelimitRule {
    fn from(body: RatelimitRuleBody) -> Self {
        RatelimitRule::new(body.name, body.limit, body.duration)
            .with_auto_apply(body.auto_apply)
            .with_async(body.is_async)
    }
}

impl From<&RatelimitRule> for RatelimitRuleBody {
    fn from(rule: &RatelimitRule) -> Self {
        Self {
            name: rule.name.clone(),
            limit: rule.limit,
            duration: rule.duration_ms,
            auto_apply: rule.auto_apply,
            is_async: rule.is_async,
        }
    }
}

/// Empty JSON object returned by delete endpoints
#[derive(Debug, Serialize)]
pub struct Empty {}

pub(crate) fn rules_from_body(rules: Vec<RatelimitRuleBody>) -> Vec<RatelimitRule> {
    rules.into_iter().map(RatelimitRule::from).collect()
}

pub(crate) fn rules_to_body(rules: &[RatelimitRule]) -> Vec<RatelimitRuleBody> {
    rules.iter().map(RatelimitRuleBody::from).collect()
}

/// Parse a unix timestamp in milliseconds
pub(crate) fn from_millis(field: &str, ms: i64) -> Result<DateTime<Utc>, ApiError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| ApiError::bad_request(format!("{} is not a valid timestamp", field)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_body_uses_duration_and_async() {
        let body: RatelimitRuleBody = serde_json::from_str(
            r#"{"name": "requests", "limit": 10, "duration": 60000, "async": true}"#,
        )
        .unwrap();
        let rule = RatelimitRule::from(body.clone());

        assert_eq!(rule.duration_ms, 60_000);
        assert!(rule.is_async);
        assert!(!rule.auto_apply);
        assert_eq!(RatelimitRuleBody::from(&rule), body);
    }

    #[test]
    fn test_from_millis() {
        let at = from_millis("expires", 1_700_000_000_000).unwrap();
        assert_eq!(at.timestamp_millis(), 1_700_000_000_000);
        assert!(from_millis("expires", i64::MAX).is_err());
    }
}
