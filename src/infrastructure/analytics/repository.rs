//! In-memory verification event store

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::analytics::{VerificationEventRepository, VerificationFilter, VerificationSummary};
use crate::domain::verification::VerificationEvent;
use crate::domain::DomainError;

#[derive(Debug, Default)]
pub struct InMemoryVerificationEventRepository {
    events: RwLock<Vec<VerificationEvent>>,
}

impl InMemoryVerificationEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }

    pub async fn events(&self) -> Vec<VerificationEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl VerificationEventRepository for InMemoryVerificationEventRepository {
    async fn write_batch(&self, events: Vec<VerificationEvent>) -> Result<(), DomainError> {
        self.events.write().await.extend(events);
        Ok(())
    }

    async fn summarize(
        &self,
        filter: &VerificationFilter,
    ) -> Result<VerificationSummary, DomainError> {
        let events = self.events.read().await;
        let mut summary = VerificationSummary::default();

        for event in events.iter().filter(|e| filter.matches(e)) {
            summary.add(event.time.date_naive(), event.outcome, 1);
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::domain::id::{ApiId, KeyId};
    use crate::domain::verification::VerificationCode;

    fn event(api: &str, outcome: VerificationCode, hours: i64) -> VerificationEvent {
        VerificationEvent {
            key_id: Some(KeyId::new("key_a").unwrap()),
            api_id: Some(ApiId::new(api).unwrap()),
            identity_id: None,
            outcome,
            cost: 1,
            time: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap() + Duration::hours(hours),
        }
    }

    #[tokio::test]
    async fn test_summarize_filters_by_api_and_window() {
        let repository = InMemoryVerificationEventRepository::new();
        repository
            .write_batch(vec![
                event("api_a", VerificationCode::Valid, 1),
                event("api_a", VerificationCode::RateLimited, 2),
                event("api_a", VerificationCode::Valid, 30),
                event("api_b", VerificationCode::Valid, 1),
                event("api_a", VerificationCode::Valid, 100),
            ])
            .await
            .unwrap();

        let filter = VerificationFilter {
            api_id: Some(ApiId::new("api_a").unwrap()),
            key_id: None,
            start: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 5, 3, 0, 0, 0).unwrap(),
        };
        let summary = repository.summarize(&filter).await.unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.outcomes[&VerificationCode::Valid], 2);
        assert_eq!(summary.days.len(), 2);
        assert_eq!(summary.days[0].total, 2);
    }

    #[tokio::test]
    async fn test_empty_summary() {
        let repository = InMemoryVerificationEventRepository::new();
        let filter = VerificationFilter {
            api_id: None,
            key_id: None,
            start: Utc::now() - Duration::days(1),
            end: Utc::now(),
        };

        let summary = repository.summarize(&filter).await.unwrap();
        assert_eq!(summary, VerificationSummary::default());
        assert!(repository.is_empty().await);
    }
}
