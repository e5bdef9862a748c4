//! API layer - HTTP endpoints and middleware

pub mod health;
pub mod middleware;
pub mod router;
pub mod state;
pub mod types;
pub mod v1;

pub use middleware::RootKey;
pub use router::{create_router, create_router_with_metrics};
pub use state::AppState;
