//! Application state shared by all handlers

use std::sync::Arc;

use sqlx::PgPool;

use crate::domain::analytics::VerificationEventRepository;
use crate::domain::id::ApiId;
use crate::domain::ratelimit::CounterStore;
use crate::infrastructure::apis::ApiService;
use crate::infrastructure::identity::IdentityService;
use crate::infrastructure::key::KeyService;
use crate::infrastructure::ratelimit::RatelimitService;
use crate::infrastructure::verification::VerificationService;

#[derive(Clone)]
pub struct AppState {
    pub verification: Arc<VerificationService>,
    pub keys: Arc<KeyService>,
    pub apis: Arc<ApiService>,
    pub identities: Arc<IdentityService>,
    pub ratelimits: Arc<RatelimitService>,
    pub analytics: Arc<dyn VerificationEventRepository>,
    /// Probed by the readiness check
    pub counters: Arc<dyn CounterStore>,
    /// Present when entities are stored in PostgreSQL
    pub database: Option<PgPool>,
    /// API whose keys authorize management calls
    pub root_api_id: ApiId,
}
