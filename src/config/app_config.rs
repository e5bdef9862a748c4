use serde::Deserialize;

use crate::infrastructure::observability::ObservabilityConfig;

/// Application configuration
///
/// Loaded from `config/default.*`, `config/local.*` and `APP__SECTION__KEY`
/// environment variables. Every field has a default, so an empty
/// configuration runs fully in memory.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub storage: StorageSettings,
    pub ratelimit: RatelimitSettings,
    pub analytics: AnalyticsSettings,
    pub keys: KeySettings,
    pub bootstrap: BootstrapSettings,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Where keys, APIs, identities and analytics are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
}

/// Where ratelimit window counters live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CounterBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RatelimitSettings {
    pub backend: CounterBackend,
    pub redis_url: Option<String>,
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyticsSettings {
    pub enabled: bool,
    /// Events buffered before new ones are dropped
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeySettings {
    pub default_prefix: String,
    pub default_byte_length: usize,
    /// Server-wide pepper; when set keys are hashed with HMAC-SHA256
    pub hash_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BootstrapSettings {
    /// API whose keys act as root keys for the management endpoints
    pub root_api_id: String,
    /// Secret of a root key with every permission, seeded at startup
    pub root_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            database_url: None,
            max_connections: 10,
        }
    }
}

impl Default for RatelimitSettings {
    fn default() -> Self {
        Self {
            backend: CounterBackend::default(),
            redis_url: None,
            key_prefix: "keygate".to_string(),
        }
    }
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 10_000,
            batch_size: 500,
            flush_interval_ms: 1_000,
        }
    }
}

impl Default for KeySettings {
    fn default() -> Self {
        Self {
            default_prefix: "sk".to_string(),
            default_byte_length: 16,
            hash_secret: None,
        }
    }
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            root_api_id: "api_root".to_string(),
            root_key: None,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_run_in_memory() {
        let config = AppConfig::default();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.ratelimit.backend, CounterBackend::Memory);
        assert!(config.analytics.enabled);
        assert_eq!(config.keys.default_byte_length, 16);
        assert_eq!(config.bootstrap.root_api_id, "api_root");
        assert!(config.bootstrap.root_key.is_none());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AppConfig = config::Config::builder()
            .set_override("storage.backend", "postgres")
            .unwrap()
            .set_override("analytics.batch_size", 10)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.storage.backend, StorageBackend::Postgres);
        assert_eq!(config.storage.max_connections, 10);
        assert_eq!(config.analytics.batch_size, 10);
        assert_eq!(config.analytics.queue_capacity, 10_000);
        assert_eq!(config.logging.level, "info");
    }
}
