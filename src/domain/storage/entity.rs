//! Storage entity traits

use std::fmt::Debug;

use serde::{de::DeserializeOwned, Serialize};

/// Trait for identifiers usable as storage keys
pub trait StorageKey: Clone + Debug + Send + Sync + Eq + std::hash::Hash {
    fn as_str(&self) -> &str;
}

/// Trait for entities persisted through the generic [`Storage`](super::Storage) abstraction
///
/// Entities are stored as JSON documents keyed by their identifier. `TABLE` names
/// the PostgreSQL table holding the documents.
pub trait StorageEntity: Clone + Debug + Send + Sync + Serialize + DeserializeOwned {
    type Key: StorageKey;

    const TABLE: &'static str;

    fn key(&self) -> &Self::Key;
}
