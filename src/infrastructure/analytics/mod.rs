//! Verification analytics: buffered sink, background writer and event stores

mod postgres;
mod repository;
mod sink;

pub use postgres::PostgresVerificationEventRepository;
pub use repository::InMemoryVerificationEventRepository;
pub use sink::{spawn_analytics, AnalyticsWorker, BufferedAnalyticsSink, NoopAnalyticsSink};
