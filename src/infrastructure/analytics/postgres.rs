//! PostgreSQL verification event store

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::domain::analytics::{VerificationEventRepository, VerificationFilter, VerificationSummary};
use crate::domain::verification::{VerificationCode, VerificationEvent};
use crate::domain::DomainError;

/// Bind parameters per inserted row
const COLUMNS_PER_ROW: usize = 6;
/// PostgreSQL accepts at most 65535 bind parameters per statement
const MAX_ROWS_PER_INSERT: usize = u16::MAX as usize / COLUMNS_PER_ROW;

#[derive(Debug, Clone)]
pub struct PostgresVerificationEventRepository {
    pool: PgPool,
}

impl PostgresVerificationEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VerificationEventRepository for PostgresVerificationEventRepository {
    async fn write_batch(&self, events: Vec<VerificationEvent>) -> Result<(), DomainError> {
        for chunk in events.chunks(MAX_ROWS_PER_INSERT) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO key_verifications (key_id, api_id, identity_id, outcome, cost, time) ",
            );

            builder.push_values(chunk, |mut row, event| {
                row.push_bind(event.key_id.as_ref().map(|id| id.as_str().to_string()))
                    .push_bind(event.api_id.as_ref().map(|id| id.as_str().to_string()))
                    .push_bind(event.identity_id.as_ref().map(|id| id.as_str().to_string()))
                    .push_bind(event.outcome.as_str())
                    .push_bind(event.cost)
                    .push_bind(event.time);
            });

            builder
                .build()
                .execute(&self.pool)
                .await
                .map_err(|e| DomainError::storage(format!("Failed to write verification events: {}", e)))?;
        }

        Ok(())
    }

    async fn summarize(
        &self,
        filter: &VerificationFilter,
    ) -> Result<VerificationSummary, DomainError> {
        let rows = sqlx::query(
            r#"
            SELECT (time AT TIME ZONE 'UTC')::date AS day, outcome, COUNT(*) AS count
            FROM key_verifications
            WHERE time >= $1 AND time < $2
              AND ($3::text IS NULL OR api_id = $3)
              AND ($4::text IS NULL OR key_id = $4)
            GROUP BY day, outcome
            ORDER BY day
            "#,
        )
        .bind(filter.start)
        .bind(filter.end)
        .bind(filter.api_id.as_ref().map(|id| id.as_str()))
        .bind(filter.key_id.as_ref().map(|id| id.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to summarize verifications: {}", e)))?;

        let mut summary = VerificationSummary::default();
        for row in rows {
            let day: NaiveDate = row
                .try_get("day")
                .map_err(|e| DomainError::storage(e.to_string()))?;
            let outcome: String = row
                .try_get("outcome")
                .map_err(|e| DomainError::storage(e.to_string()))?;
            let count: i64 = row
                .try_get("count")
                .map_err(|e| DomainError::storage(e.to_string()))?;

            let outcome: VerificationCode = outcome.parse().map_err(DomainError::storage)?;
            summary.add(day, outcome, count.max(0) as u64);
        }

        Ok(summary)
    }
}
