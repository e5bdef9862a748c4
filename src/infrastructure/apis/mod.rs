//! API infrastructure

mod repository;
mod service;

pub use repository::StorageApiRepository;
pub use service::ApiService;
