//! Storage infrastructure

mod factory;
mod in_memory;
pub mod migrations;
mod postgres;

pub use factory::StorageFactory;
pub use in_memory::InMemoryStorage;
pub use migrations::{run_migrations, Migration, PostgresMigrator};
pub use postgres::{PostgresConfig, PostgresStorage};
