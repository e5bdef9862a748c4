//! Verification analytics endpoint

use axum::extract::{Query, State};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::api::middleware::RootKey;
use crate::api::state::AppState;
use crate::api::types::{ApiError, Json};
use crate::domain::analytics::{VerificationFilter, VerificationSummary};
use crate::domain::id::{ApiId, KeyId};

use super::from_millis;

/// Window used when `start` is omitted
const DEFAULT_LOOKBACK_DAYS: i64 = 30;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationsQuery {
    pub api_id: ApiId,
    pub key_id: Option<KeyId>,
    /// Unix milliseconds, inclusive
    pub start: Option<i64>,
    /// Unix milliseconds, exclusive
    pub end: Option<i64>,
}

pub async fn get_verifications(
    State(state): State<AppState>,
    root: RootKey,
    Query(query): Query<VerificationsQuery>,
) -> Result<Json<VerificationSummary>, ApiError> {
    root.require(&state, &format!("api.{}.read_analytics", query.api_id))?;

    let (start, end) = query_window(query.start, query.end, Utc::now())?;

    let summary = state
        .analytics
        .summarize(&VerificationFilter {
            api_id: Some(query.api_id),
            key_id: query.key_id,
            start,
            end,
        })
        .await?;

    Ok(Json(summary))
}

/// Resolve the requested `[start, end)` window, defaulting to the last 30 days
fn query_window(
    start: Option<i64>,
    end: Option<i64>,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), ApiError> {
    let end = match end {
        Some(ms) => from_millis("end", ms)?,
        None => now,
    };
    let start = match start {
        Some(ms) => from_millis("start", ms)?,
        None => end
            .checked_sub_signed(Duration::days(DEFAULT_LOOKBACK_DAYS))
            .ok_or_else(|| ApiError::bad_request("end is too early for the default window"))?,
    };
    if start >= end {
        return Err(ApiError::bad_request("start must be before end"));
    }

    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;

    #[test]
    fn test_defaults_to_thirty_days_before_end() {
        let now = Utc::now();
        let (start, end) = query_window(None, None, now).unwrap();

        assert_eq!(end, now);
        assert_eq!(end - start, Duration::days(30));
    }

    #[test]
    fn test_rejects_reversed_window() {
        let error = query_window(Some(2_000), Some(1_000), Utc::now()).unwrap_err();
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_end_near_minimum_is_rejected() {
        let end = DateTime::<Utc>::MIN_UTC.timestamp_millis();

        let error = query_window(None, Some(end), Utc::now()).unwrap_err();
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
    }
}
