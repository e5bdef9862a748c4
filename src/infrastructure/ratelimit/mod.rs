//! Ratelimit infrastructure: counter stores, the window evaluator and
//! namespace-based standalone limiting

mod evaluator;
mod memory_counter;
mod redis_counter;
mod repository;
mod service;

pub use evaluator::{counter_key, window_start, RatelimitEvaluator};
pub use memory_counter::InMemoryCounterStore;
pub use redis_counter::RedisCounterStore;
pub use repository::{StorageNamespaceRepository, StorageOverrideRepository};
pub use service::{LimitRequest, LimitResponse, NamespaceRef, OverrideSpec, RatelimitService};
