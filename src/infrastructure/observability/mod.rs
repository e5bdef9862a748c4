//! Observability infrastructure - Tracing and Metrics

mod config;
mod metrics;
mod tracing_setup;

pub use config::{MetricsConfig, ObservabilityConfig, TracingConfig};
pub use metrics::{
    create_metrics_router, init_metrics, record_analytics_batch, record_analytics_dropped,
    record_http_request, record_ratelimit_backend_error, record_ratelimit_check,
    record_verification, PrometheusMetrics,
};
pub use tracing_setup::{init_tracing, shutdown_tracing};
