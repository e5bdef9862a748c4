//! Prometheus metrics

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, response::IntoResponse, routing::get, Router};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::verification::VerificationCode;

use super::config::MetricsConfig;

/// Handle used to render the `/metrics` endpoint
#[derive(Clone)]
pub struct PrometheusMetrics {
    handle: Arc<PrometheusHandle>,
}

impl PrometheusMetrics {
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Install the global Prometheus recorder
pub fn init_metrics(config: &MetricsConfig) -> Option<PrometheusMetrics> {
    if !config.enabled {
        tracing::info!("Prometheus metrics disabled");
        return None;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            gauge!("keygate_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
            tracing::info!(path = %config.path, "Prometheus metrics initialized");

            Some(PrometheusMetrics {
                handle: Arc::new(handle),
            })
        }
        Err(e) => {
            tracing::error!("Failed to initialize Prometheus metrics: {}", e);
            None
        }
    }
}

pub fn create_metrics_router(metrics: PrometheusMetrics, path: &str) -> Router {
    Router::new()
        .route(path, get(metrics_handler))
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<PrometheusMetrics>) -> impl IntoResponse {
    metrics.render()
}

/// `path` should be the matched route pattern to keep label cardinality bounded
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];

    counter!("http_requests_total", &labels).increment(1);
    histogram!("http_request_duration_seconds", &labels).record(duration.as_secs_f64());
}

pub fn record_verification(code: VerificationCode) {
    counter!("key_verifications_total", "code" => code.as_str()).increment(1);
}

pub fn record_ratelimit_check(passed: bool) {
    counter!("ratelimit_checks_total", "passed" => bool_label(passed)).increment(1);
}

/// A counter backend failure resolved by failing open or closed
pub fn record_ratelimit_backend_error(fail_open: bool) {
    let mode = if fail_open { "fail_open" } else { "fail_closed" };
    counter!("ratelimit_backend_errors_total", "mode" => mode).increment(1);
}

pub fn record_analytics_dropped() {
    counter!("analytics_events_dropped_total").increment(1);
}

pub fn record_analytics_batch(events: usize) {
    counter!("analytics_batches_written_total").increment(1);
    counter!("analytics_events_written_total").increment(events as u64);
}

fn bool_label(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}
