//! Migrate command - applies PostgreSQL migrations and exits

use tracing::info;

use crate::config::{AppConfig, StorageBackend};
use crate::infrastructure::logging::init_logging;
use crate::infrastructure::storage::{run_migrations, PostgresConfig};

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    init_logging(&config.logging);

    if config.storage.backend != StorageBackend::Postgres {
        anyhow::bail!("Migrations require storage.backend = postgres");
    }

    let url = config
        .storage
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("storage.database_url is required"))?;

    let pool = PostgresConfig::new(url)
        .with_max_connections(1)
        .connect()
        .await?;

    let applied = run_migrations(&pool).await?;
    info!("Applied {} migrations", applied);

    pool.close().await;
    Ok(())
}
