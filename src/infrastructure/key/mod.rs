//! Key infrastructure: secret generation, key stores and the management service

mod hasher;
mod postgres;
mod repository;
mod service;

pub use hasher::{GeneratedKey, KeyGenerator, KeyHasher};
pub use postgres::PostgresKeyRepository;
pub use repository::InMemoryKeyRepository;
pub use service::{CreateKey, CreatedKey, KeyService, KeyUpdate};
