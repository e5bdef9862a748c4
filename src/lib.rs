//! Keygate
//!
//! API key verification service with:
//! - Hashed keys with expiry, usage limits and scheduled refills
//! - Fixed-window rate limits per key, identity or namespace
//! - Wildcard permission checks
//! - Buffered verification analytics

pub mod api;
pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;

use std::sync::Arc;

use api::state::AppState;
use domain::{
    AnalyticsSink, ApiId, ApiRepository, CounterStore, IdentityRepository, KeyRepository,
    VerificationEventRepository, WildcardAuthorizer,
};
use infrastructure::{
    analytics::{
        spawn_analytics, AnalyticsWorker, InMemoryVerificationEventRepository, NoopAnalyticsSink,
        PostgresVerificationEventRepository,
    },
    apis::{ApiService, StorageApiRepository},
    identity::{IdentityService, StorageIdentityRepository},
    key::{CreateKey, InMemoryKeyRepository, KeyGenerator, KeyHasher, KeyService, PostgresKeyRepository},
    ratelimit::{
        InMemoryCounterStore, RatelimitEvaluator, RatelimitService, RedisCounterStore,
        StorageNamespaceRepository, StorageOverrideRepository,
    },
    storage::{run_migrations, StorageFactory},
    verification::VerificationService,
};
use tracing::{info, warn};

use crate::config::{BootstrapSettings, CounterBackend, RatelimitSettings};

/// Wired application: request state plus the analytics writer
pub struct App {
    pub state: AppState,
    pub analytics_worker: Option<AnalyticsWorker>,
}

impl App {
    /// Flush buffered analytics
    pub async fn shutdown(self) {
        if let Some(worker) = self.analytics_worker {
            worker.shutdown().await;
        }
    }
}

/// Build every service for the given configuration
pub async fn create_app(config: &AppConfig) -> anyhow::Result<App> {
    let factory = StorageFactory::from_settings(&config.storage).await?;

    if let Some(pool) = factory.pool() {
        let applied = run_migrations(pool).await?;
        info!("Applied {} migrations", applied);
    }

    let keys: Arc<dyn KeyRepository> = match factory.pool() {
        Some(pool) => Arc::new(PostgresKeyRepository::new(pool.clone())),
        None => Arc::new(InMemoryKeyRepository::new()),
    };
    let apis: Arc<dyn ApiRepository> = Arc::new(StorageApiRepository::new(factory.create()));
    let identities: Arc<dyn IdentityRepository> =
        Arc::new(StorageIdentityRepository::new(factory.create()));

    let counters = create_counter_store(&config.ratelimit).await?;
    let evaluator = Arc::new(RatelimitEvaluator::new(counters.clone()));
    let hasher = KeyHasher::from_secret(config.keys.hash_secret.as_deref())?;

    let analytics: Arc<dyn VerificationEventRepository> = match factory.pool() {
        Some(pool) => Arc::new(PostgresVerificationEventRepository::new(pool.clone())),
        None => Arc::new(InMemoryVerificationEventRepository::new()),
    };

    let (sink, analytics_worker): (Arc<dyn AnalyticsSink>, Option<AnalyticsWorker>) =
        if config.analytics.enabled {
            let (sink, worker) = spawn_analytics(analytics.clone(), &config.analytics);
            let sink: Arc<dyn AnalyticsSink> = Arc::new(sink);
            (sink, Some(worker))
        } else {
            info!("Verification analytics disabled");
            let sink: Arc<dyn AnalyticsSink> = Arc::new(NoopAnalyticsSink);
            (sink, None)
        };

    let identity_service = Arc::new(IdentityService::new(identities.clone(), keys.clone()));
    let key_service = Arc::new(
        KeyService::new(
            keys.clone(),
            apis.clone(),
            identity_service.clone(),
            KeyGenerator::new(hasher.clone()),
        )
        .with_defaults(&config.keys),
    );
    let api_service = Arc::new(ApiService::new(apis.clone()));
    let ratelimit_service = Arc::new(RatelimitService::new(
        Arc::new(StorageNamespaceRepository::new(factory.create())),
        Arc::new(StorageOverrideRepository::new(factory.create())),
        evaluator.clone(),
    ));
    let verification = Arc::new(VerificationService::new(
        keys.clone(),
        apis,
        identities,
        evaluator,
        Arc::new(WildcardAuthorizer::new()),
        sink,
        hasher.clone(),
    ));

    let root_api_id = ApiId::new(config.bootstrap.root_api_id.clone())?;
    api_service.ensure_api(&root_api_id, "root").await?;
    seed_root_key(&key_service, keys.as_ref(), &hasher, &root_api_id, &config.bootstrap).await?;

    let state = AppState {
        verification,
        keys: key_service,
        apis: api_service,
        identities: identity_service,
        ratelimits: ratelimit_service,
        analytics,
        counters,
        database: factory.pool().cloned(),
        root_api_id,
    };

    Ok(App {
        state,
        analytics_worker,
    })
}

async fn create_counter_store(settings: &RatelimitSettings) -> anyhow::Result<Arc<dyn CounterStore>> {
    match settings.backend {
        CounterBackend::Memory => {
            info!("Using in-memory ratelimit counters");
            Ok(Arc::new(InMemoryCounterStore::new()))
        }
        CounterBackend::Redis => {
            let url = settings.redis_url.as_deref().ok_or_else(|| {
                anyhow::anyhow!("ratelimit.redis_url is required for the redis backend")
            })?;
            let store = RedisCounterStore::connect(url, settings.key_prefix.clone()).await?;
            info!("Using Redis ratelimit counters");
            Ok(Arc::new(store))
        }
    }
}

/// Make sure the root API has a usable key
///
/// A configured secret is stored once. Without one, a random root key is
/// generated the first time the root API has no keys and printed to the log.
async fn seed_root_key(
    key_service: &KeyService,
    keys: &dyn KeyRepository,
    hasher: &KeyHasher,
    root_api_id: &ApiId,
    bootstrap: &BootstrapSettings,
) -> anyhow::Result<()> {
    let request = CreateKey {
        name: Some("root".to_string()),
        permissions: vec!["*".to_string()],
        ..CreateKey::new(root_api_id.clone())
    };

    match bootstrap.root_key.as_deref() {
        Some(secret) => {
            if keys.find_by_hash(&hasher.hash(secret)).await?.is_none() {
                let created = key_service.create_key_with_secret(request, secret).await?;
                info!(key_id = %created.key.id(), "Seeded configured root key");
            }
        }
        None => {
            if key_service.list_keys(root_api_id).await?.is_empty() {
                let created = key_service.create_key(request).await?;
                warn!("===========================================");
                warn!("No root key configured, generated one:");
                warn!("Key ID: {}", created.key.id());
                warn!("Key: {}", created.secret);
                warn!("Set bootstrap.root_key to choose your own.");
                warn!("===========================================");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::verification::VerifyKey;

    #[tokio::test]
    async fn test_default_config_runs_in_memory() {
        let app = create_app(&AppConfig::default()).await.unwrap();

        assert!(app.state.database.is_none());
        assert!(app.analytics_worker.is_some());
        assert_eq!(app.state.root_api_id.as_str(), "api_root");
        assert_eq!(app.state.keys.list_keys(&app.state.root_api_id).await.unwrap().len(), 1);

        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_configured_root_key_verifies() {
        let mut config = AppConfig::default();
        config.bootstrap.root_key = Some("root_secret".to_string());
        config.analytics.enabled = false;
        let app = create_app(&config).await.unwrap();

        let result = app
            .state
            .verification
            .verify(VerifyKey::new("root_secret").with_api_id(app.state.root_api_id.clone()))
            .await
            .unwrap();

        assert!(result.is_valid());
        assert_eq!(result.key.unwrap().permissions(), ["*".to_string()]);
        assert!(app.analytics_worker.is_none());
    }

    #[tokio::test]
    async fn test_redis_backend_requires_url() {
        let mut config = AppConfig::default();
        config.ratelimit.backend = CounterBackend::Redis;

        assert!(create_app(&config).await.is_err());
    }
}
