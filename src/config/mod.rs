mod app_config;

pub use app_config::{
    AnalyticsSettings, AppConfig, BootstrapSettings, CounterBackend, KeySettings, LogFormat,
    LoggingConfig, RatelimitSettings, ServerConfig, StorageBackend, StorageSettings,
};
