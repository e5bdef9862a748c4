//! Identity infrastructure

mod repository;
mod service;

pub use repository::StorageIdentityRepository;
pub use service::{IdentityLookup, IdentityService};
