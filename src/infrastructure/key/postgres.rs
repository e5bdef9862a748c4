//! PostgreSQL key repository
//!
//! Keys use explicit columns so that usage changes are single conditional
//! `UPDATE` statements instead of read-modify-write cycles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::Row;

use crate::domain::id::{ApiId, IdentityId, KeyId};
use crate::domain::key::{apply_remaining_op, Key, KeyRepository, Refill, RemainingDecrement, RemainingOp};
use crate::domain::ratelimit::RatelimitRule;
use crate::domain::DomainError;

const KEY_COLUMNS: &str = "id, api_id, hash, start, name, owner_id, identity_id, meta, remaining, \
     refill, last_refill_at, ratelimits, permissions, roles, enabled, expires_at, created_at, \
     updated_at, deleted_at";

#[derive(Debug, Clone)]
pub struct PostgresKeyRepository {
    pool: PgPool,
}

impl PostgresKeyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// `Some(remaining)` for an existing key, `None` when it does not exist
    async fn current_remaining(&self, id: &KeyId) -> Result<Option<Option<i64>>, DomainError> {
        sqlx::query_scalar::<_, Option<i64>>("SELECT remaining FROM keys WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error("read key usage"))
    }

    async fn fetch_one_by(&self, column: &str, value: &str) -> Result<Option<Key>, DomainError> {
        let query = format!("SELECT {} FROM keys WHERE {} = $1", KEY_COLUMNS, column);

        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error("get key"))?;

        row.as_ref().map(key_from_row).transpose()
    }

    async fn fetch_many_by(&self, column: &str, value: &str) -> Result<Vec<Key>, DomainError> {
        let query = format!(
            "SELECT {} FROM keys WHERE {} = $1 AND deleted_at IS NULL ORDER BY created_at",
            KEY_COLUMNS, column
        );

        let rows = sqlx::query(&query)
            .bind(value)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error("list keys"))?;

        rows.iter().map(key_from_row).collect()
    }
}

fn storage_error(action: &'static str) -> impl Fn(sqlx::Error) -> DomainError {
    move |e| DomainError::storage(format!("Failed to {}: {}", action, e))
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

fn key_from_row(row: &PgRow) -> Result<Key, DomainError> {
    let decode = |e: sqlx::Error| DomainError::storage(format!("Failed to decode key row: {}", e));

    let id = KeyId::new(row.try_get::<String, _>("id").map_err(decode)?)?;
    let api_id = ApiId::new(row.try_get::<String, _>("api_id").map_err(decode)?)?;
    let identity_id = row
        .try_get::<Option<String>, _>("identity_id")
        .map_err(decode)?
        .map(IdentityId::new)
        .transpose()?;

    let Json(meta) = row.try_get::<Json<Map<String, Value>>, _>("meta").map_err(decode)?;
    let refill = row
        .try_get::<Option<Json<Refill>>, _>("refill")
        .map_err(decode)?
        .map(|Json(refill)| refill);
    let Json(ratelimits) = row
        .try_get::<Json<Vec<RatelimitRule>>, _>("ratelimits")
        .map_err(decode)?;
    let Json(permissions) = row.try_get::<Json<Vec<String>>, _>("permissions").map_err(decode)?;
    let Json(roles) = row.try_get::<Json<Vec<String>>, _>("roles").map_err(decode)?;

    Ok(Key::new(
        api_id,
        row.try_get::<String, _>("hash").map_err(decode)?,
        row.try_get::<String, _>("start").map_err(decode)?,
    )
    .with_id(id)
    .with_name(row.try_get("name").map_err(decode)?)
    .with_owner_id(row.try_get("owner_id").map_err(decode)?)
    .with_identity(identity_id)
    .with_meta(meta)
    .with_remaining(row.try_get("remaining").map_err(decode)?)
    .with_refill(refill)
    .with_last_refill_at(row.try_get("last_refill_at").map_err(decode)?)
    .with_ratelimits(ratelimits)
    .with_permissions(permissions)
    .with_roles(roles)
    .with_enabled(row.try_get("enabled").map_err(decode)?)
    .with_expires_at(row.try_get("expires_at").map_err(decode)?)
    .with_timestamps(
        row.try_get("created_at").map_err(decode)?,
        row.try_get("updated_at").map_err(decode)?,
    )
    .with_deleted_at(row.try_get("deleted_at").map_err(decode)?))
}

#[async_trait]
impl KeyRepository for PostgresKeyRepository {
    async fn get(&self, id: &KeyId) -> Result<Option<Key>, DomainError> {
        self.fetch_one_by("id", id.as_str()).await
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<Key>, DomainError> {
        self.fetch_one_by("hash", hash).await
    }

    async fn create(&self, key: Key) -> Result<Key, DomainError> {
        let query = format!(
            "INSERT INTO keys ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, \
             $14, $15, $16, $17, $18, $19)",
            KEY_COLUMNS
        );

        sqlx::query(&query)
            .bind(key.id().as_str())
            .bind(key.api_id().as_str())
            .bind(key.hash())
            .bind(key.start())
            .bind(key.name())
            .bind(key.owner_id())
            .bind(key.identity_id().map(|id| id.as_str()))
            .bind(Json(key.meta()))
            .bind(key.remaining())
            .bind(key.refill().map(Json))
            .bind(key.last_refill_at())
            .bind(Json(key.ratelimits()))
            .bind(Json(key.permissions()))
            .bind(Json(key.roles()))
            .bind(key.enabled())
            .bind(key.expires_at())
            .bind(key.created_at())
            .bind(key.updated_at())
            .bind(key.deleted_at())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DomainError::conflict(format!("Key '{}' already exists", key.id()))
                } else {
                    DomainError::storage(format!("Failed to create key: {}", e))
                }
            })?;

        Ok(key)
    }

    async fn update(&self, key: Key) -> Result<Key, DomainError> {
        let query = format!(
            "UPDATE keys SET name = $2, owner_id = $3, identity_id = $4, meta = $5, refill = $6, \
             ratelimits = $7, permissions = $8, roles = $9, enabled = $10, expires_at = $11, \
             updated_at = $12 WHERE id = $1 RETURNING {}",
            KEY_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(key.id().as_str())
            .bind(key.name())
            .bind(key.owner_id())
            .bind(key.identity_id().map(|id| id.as_str()))
            .bind(Json(key.meta()))
            .bind(key.refill().map(Json))
            .bind(Json(key.ratelimits()))
            .bind(Json(key.permissions()))
            .bind(Json(key.roles()))
            .bind(key.enabled())
            .bind(key.expires_at())
            .bind(key.updated_at())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error("update key"))?
            .ok_or_else(|| DomainError::not_found(format!("Key '{}' not found", key.id())))?;

        key_from_row(&row)
    }

    async fn soft_delete(&self, id: &KeyId, at: DateTime<Utc>) -> Result<bool, DomainError> {
        let result = sqlx::query(
            "UPDATE keys SET deleted_at = $2, updated_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id.as_str())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(storage_error("delete key"))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_by_api(&self, api_id: &ApiId) -> Result<Vec<Key>, DomainError> {
        self.fetch_many_by("api_id", api_id.as_str()).await
    }

    async fn list_by_identity(&self, identity_id: &IdentityId) -> Result<Vec<Key>, DomainError> {
        self.fetch_many_by("identity_id", identity_id.as_str()).await
    }

    async fn unlink_identity(&self, identity_id: &IdentityId) -> Result<u64, DomainError> {
        let result = sqlx::query(
            "UPDATE keys SET identity_id = NULL, updated_at = NOW() WHERE identity_id = $1",
        )
        .bind(identity_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage_error("unlink identity"))?;

        Ok(result.rows_affected())
    }

    async fn decrement_remaining(
        &self,
        id: &KeyId,
        amount: i64,
    ) -> Result<RemainingDecrement, DomainError> {
        let updated: Option<i64> = sqlx::query_scalar(
            "UPDATE keys SET remaining = remaining - $2, updated_at = NOW() \
             WHERE id = $1 AND remaining IS NOT NULL AND remaining >= $2 RETURNING remaining",
        )
        .bind(id.as_str())
        .bind(amount)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error("decrement key usage"))?;

        if let Some(remaining) = updated {
            return Ok(RemainingDecrement::Decremented { remaining });
        }

        match self.current_remaining(id).await? {
            None => Err(DomainError::not_found(format!("Key '{}' not found", id))),
            Some(None) => Ok(RemainingDecrement::Unlimited),
            Some(Some(remaining)) => Ok(RemainingDecrement::UsageExceeded { remaining }),
        }
    }

    async fn update_remaining(
        &self,
        id: &KeyId,
        op: RemainingOp,
        value: Option<i64>,
    ) -> Result<Option<i64>, DomainError> {
        let statement = match (op, value) {
            (RemainingOp::Set, _) => {
                "UPDATE keys SET remaining = $2, updated_at = NOW() WHERE id = $1 RETURNING remaining"
            }
            (_, None) => return apply_remaining_op(Some(0), op, None),
            (RemainingOp::Increment, Some(_)) => {
                "UPDATE keys SET remaining = GREATEST(remaining + $2, 0), updated_at = NOW() \
                 WHERE id = $1 AND remaining IS NOT NULL RETURNING remaining"
            }
            (RemainingOp::Decrement, Some(_)) => {
                "UPDATE keys SET remaining = GREATEST(remaining - $2, 0), updated_at = NOW() \
                 WHERE id = $1 AND remaining IS NOT NULL RETURNING remaining"
            }
        };

        let value = match op {
            RemainingOp::Set => value.map(|v| v.max(0)),
            _ => value,
        };

        let updated: Option<Option<i64>> = sqlx::query_scalar(statement)
            .bind(id.as_str())
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error("update key usage"))?;

        if let Some(remaining) = updated {
            return Ok(remaining);
        }

        match self.current_remaining(id).await? {
            None => Err(DomainError::not_found(format!("Key '{}' not found", id))),
            // only reachable for increment/decrement on an unlimited key
            Some(current) => apply_remaining_op(current, op, value),
        }
    }

    async fn refill(
        &self,
        id: &KeyId,
        amount: i64,
        period_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, DomainError> {
        sqlx::query_scalar(
            "UPDATE keys SET remaining = $2, last_refill_at = $4, updated_at = $4 \
             WHERE id = $1 AND COALESCE(last_refill_at, created_at) < $3 RETURNING remaining",
        )
        .bind(id.as_str())
        .bind(amount)
        .bind(period_start)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error("refill key"))
    }
}
