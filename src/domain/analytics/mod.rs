//! Analytics domain
//!
//! Verification events are handed to an [`AnalyticsSink`] on the request path
//! and persisted in batches through a [`VerificationEventRepository`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::domain::id::{ApiId, KeyId};
use crate::domain::verification::{VerificationCode, VerificationEvent};
use crate::domain::DomainError;

#[cfg(test)]
use mockall::automock;

/// Fire-and-forget receiver of verification events
///
/// `record` must never block the caller or report failure.
pub trait AnalyticsSink: Send + Sync {
    fn record(&self, event: VerificationEvent);
}

/// Selection of events to aggregate
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationFilter {
    pub api_id: Option<ApiId>,
    pub key_id: Option<KeyId>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl VerificationFilter {
    pub fn matches(&self, event: &VerificationEvent) -> bool {
        event.time >= self.start
            && event.time < self.end
            && self
                .api_id
                .as_ref()
                .is_none_or(|id| event.api_id.as_ref() == Some(id))
            && self
                .key_id
                .as_ref()
                .is_none_or(|id| event.key_id.as_ref() == Some(id))
    }
}

/// Verification counts for one UTC day
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyVerifications {
    pub date: NaiveDate,
    pub total: u64,
    pub outcomes: BTreeMap<VerificationCode, u64>,
}

/// Aggregated verification counts
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSummary {
    pub total: u64,
    pub outcomes: BTreeMap<VerificationCode, u64>,
    pub days: Vec<DailyVerifications>,
}

impl VerificationSummary {
    /// Add `count` events with `outcome` on `date`
    pub fn add(&mut self, date: NaiveDate, outcome: VerificationCode, count: u64) {
        self.total += count;
        *self.outcomes.entry(outcome).or_insert(0) += count;

        let day = match self.days.iter().position(|d| d.date == date) {
            Some(index) => &mut self.days[index],
            None => {
                self.days.push(DailyVerifications {
                    date,
                    total: 0,
                    outcomes: BTreeMap::new(),
                });
                self.days.sort_by_key(|d| d.date);
                let index = self.days.iter().position(|d| d.date == date).unwrap_or(0);
                &mut self.days[index]
            }
        };

        day.total += count;
        *day.outcomes.entry(outcome).or_insert(0) += count;
    }
}

/// Durable store of verification events
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VerificationEventRepository: Send + Sync {
    async fn write_batch(&self, events: Vec<VerificationEvent>) -> Result<(), DomainError>;

    async fn summarize(&self, filter: &VerificationFilter)
        -> Result<VerificationSummary, DomainError>;
}
