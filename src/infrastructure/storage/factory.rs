//! Storage factory for runtime backend selection

use std::sync::Arc;

use sqlx::postgres::PgPool;
use tracing::info;

use crate::config::{StorageBackend, StorageSettings};
use crate::domain::storage::{Storage, StorageEntity};
use crate::domain::DomainError;

use super::in_memory::InMemoryStorage;
use super::postgres::{PostgresConfig, PostgresStorage};

/// Hands out storage instances for the configured backend
///
/// A Postgres backend shares one pool across every entity type.
#[derive(Debug, Clone, Default)]
pub struct StorageFactory {
    pool: Option<PgPool>,
}

impl StorageFactory {
    pub fn in_memory() -> Self {
        Self { pool: None }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self { pool: Some(pool) }
    }

    /// Connects to the configured backend
    pub async fn from_settings(settings: &StorageSettings) -> Result<Self, DomainError> {
        match settings.backend {
            StorageBackend::Memory => {
                info!("Using in-memory storage");
                Ok(Self::in_memory())
            }
            StorageBackend::Postgres => {
                let url = settings.database_url.as_deref().ok_or_else(|| {
                    DomainError::configuration(
                        "storage.database_url is required for the postgres backend",
                    )
                })?;

                let pool = PostgresConfig::new(url)
                    .with_max_connections(settings.max_connections)
                    .connect()
                    .await?;

                info!(max_connections = settings.max_connections, "Connected to PostgreSQL");
                Ok(Self::postgres(pool))
            }
        }
    }

    pub fn pool(&self) -> Option<&PgPool> {
        self.pool.as_ref()
    }

    pub fn is_persistent(&self) -> bool {
        self.pool.is_some()
    }

    pub fn create<E>(&self) -> Arc<dyn Storage<E>>
    where
        E: StorageEntity + 'static,
    {
        match &self.pool {
            Some(pool) => Arc::new(PostgresStorage::<E>::new(pool.clone())),
            None => Arc::new(InMemoryStorage::<E>::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::apis::Api;

    #[tokio::test]
    async fn test_memory_settings_build_in_memory_storage() {
        let factory = StorageFactory::from_settings(&StorageSettings::default())
            .await
            .unwrap();
        assert!(!factory.is_persistent());

        let storage = factory.create::<Api>();
        let api = storage.create(Api::new("payments").unwrap()).await.unwrap();
        assert!(storage.get(&api.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_postgres_requires_database_url() {
        let settings = StorageSettings {
            backend: StorageBackend::Postgres,
            database_url: None,
            max_connections: 5,
        };

        let result = StorageFactory::from_settings(&settings).await;
        assert!(matches!(result, Err(DomainError::Configuration { .. })));
    }
}
