//! Database migrations

use sqlx::postgres::PgPool;
use tracing::info;

use crate::domain::DomainError;

/// Applies versioned SQL migrations and records them in `_migrations`
#[derive(Debug)]
pub struct PostgresMigrator {
    pool: PgPool,
}

impl PostgresMigrator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn ensure_migrations_table(&self) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version BIGINT PRIMARY KEY,
                description TEXT NOT NULL,
                installed_on TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to create migrations table: {}", e)))?;

        Ok(())
    }

    async fn is_applied(&self, version: i64) -> Result<bool, DomainError> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM _migrations WHERE version = $1)")
            .bind(version)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to check migration status: {}", e)))
    }

    /// Applies a migration unless it is already recorded. Returns whether it ran.
    pub async fn run_migration(&self, migration: &Migration) -> Result<bool, DomainError> {
        self.ensure_migrations_table().await?;

        if self.is_applied(migration.version).await? {
            return Ok(false);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DomainError::storage(format!("Failed to begin transaction: {}", e)))?;

        sqlx::raw_sql(migration.up)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                DomainError::storage(format!(
                    "Failed to run migration {}: {}",
                    migration.version, e
                ))
            })?;

        sqlx::query("INSERT INTO _migrations (version, description) VALUES ($1, $2)")
            .bind(migration.version)
            .bind(migration.description)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                DomainError::storage(format!(
                    "Failed to record migration {}: {}",
                    migration.version, e
                ))
            })?;

        tx.commit()
            .await
            .map_err(|e| DomainError::storage(format!("Failed to commit migration: {}", e)))?;

        info!(
            version = migration.version,
            description = migration.description,
            "Applied migration"
        );

        Ok(true)
    }

    /// Latest applied migration version
    pub async fn current_version(&self) -> Result<Option<i64>, DomainError> {
        self.ensure_migrations_table().await?;

        sqlx::query_scalar("SELECT MAX(version) FROM _migrations")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to get migration version: {}", e)))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub up: &'static str,
}

impl Migration {
    pub const fn new(version: i64, description: &'static str, up: &'static str) -> Self {
        Self {
            version,
            description,
            up,
        }
    }
}

/// Document table layout shared by the JSONB-backed entities
macro_rules! document_table {
    ($table:literal) => {
        concat!(
            "CREATE TABLE IF NOT EXISTS ",
            $table,
            " (
                key VARCHAR(255) PRIMARY KEY,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );"
        )
    };
}

pub const MIGRATIONS: &[Migration] = &[
    Migration::new(1, "Create apis table", document_table!("apis")),
    Migration::new(2, "Create identities table", document_table!("identities")),
    Migration::new(
        3,
        "Create keys table",
        r#"
        CREATE TABLE IF NOT EXISTS keys (
            id VARCHAR(64) PRIMARY KEY,
            api_id VARCHAR(64) NOT NULL,
            hash TEXT NOT NULL UNIQUE,
            start VARCHAR(32) NOT NULL,
            name TEXT,
            owner_id TEXT,
            identity_id VARCHAR(64),
            meta JSONB NOT NULL DEFAULT '{}',
            remaining BIGINT,
            refill JSONB,
            last_refill_at TIMESTAMPTZ,
            ratelimits JSONB NOT NULL DEFAULT '[]',
            permissions JSONB NOT NULL DEFAULT '[]',
            roles JSONB NOT NULL DEFAULT '[]',
            enabled BOOLEAN NOT NULL DEFAULT TRUE,
            expires_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            deleted_at TIMESTAMPTZ,
            CONSTRAINT keys_remaining_non_negative CHECK (remaining IS NULL OR remaining >= 0)
        );
        CREATE INDEX IF NOT EXISTS idx_keys_api_id ON keys(api_id) WHERE deleted_at IS NULL;
        CREATE INDEX IF NOT EXISTS idx_keys_identity_id ON keys(identity_id);
        "#,
    ),
    Migration::new(
        4,
        "Create ratelimit namespace tables",
        concat!(
            document_table!("ratelimit_namespaces"),
            document_table!("ratelimit_overrides")
        ),
    ),
    Migration::new(
        5,
        "Create key_verifications table",
        r#"
        CREATE TABLE IF NOT EXISTS key_verifications (
            id BIGSERIAL PRIMARY KEY,
            key_id VARCHAR(64),
            api_id VARCHAR(64),
            identity_id VARCHAR(64),
            outcome VARCHAR(32) NOT NULL,
            cost BIGINT NOT NULL,
            time TIMESTAMPTZ NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_key_verifications_api_time ON key_verifications(api_id, time);
        CREATE INDEX IF NOT EXISTS idx_key_verifications_key_time ON key_verifications(key_id, time);
        "#,
    ),
];

/// Runs all pending migrations, returning how many were applied
pub async fn run_migrations(pool: &PgPool) -> Result<usize, DomainError> {
    let migrator = PostgresMigrator::new(pool.clone());
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migrator.run_migration(migration).await? {
            applied += 1;
        }
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_ordered() {
        for pair in MIGRATIONS.windows(2) {
            assert!(
                pair[1].version > pair[0].version,
                "Migrations should be in ascending order"
            );
        }
    }

    #[test]
    fn test_migrations_have_content() {
        for migration in MIGRATIONS {
            assert!(!migration.description.is_empty());
            assert!(migration.up.contains("CREATE TABLE"));
        }
    }

    #[test]
    fn test_every_document_table_is_created() {
        let all: String = MIGRATIONS.iter().map(|m| m.up).collect();

        for table in [
            "apis",
            "identities",
            "keys",
            "ratelimit_namespaces",
            "ratelimit_overrides",
            "key_verifications",
        ] {
            assert!(
                all.contains(&format!("CREATE TABLE IF NOT EXISTS {} ", table))
                    || all.contains(&format!("CREATE TABLE IF NOT EXISTS {} (", table)),
                "missing table {}",
                table
            );
        }
    }
}
