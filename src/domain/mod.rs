//! Domain layer - Core entities, invariants and repository traits

pub mod analytics;
pub mod apis;
pub mod error;
pub mod id;
pub mod identity;
pub mod key;
pub mod ratelimit;
pub mod storage;
pub mod verification;

pub use analytics::{
    AnalyticsSink, VerificationEventRepository, VerificationFilter, VerificationSummary,
};
pub use apis::{Api, ApiRepository};
pub use error::DomainError;
pub use id::{ApiId, IdentityId, KeyId, NamespaceId, OverrideId};
pub use identity::{Identity, IdentityRepository};
pub use key::{Key, KeyRepository, Refill, RefillInterval, RemainingDecrement, RemainingOp};
pub use ratelimit::{
    CounterStore, RatelimitNamespace, RatelimitOverride, RatelimitRequest, RatelimitResult,
    RatelimitRule,
};
pub use storage::{Storage, StorageEntity, StorageKey};
pub use verification::{
    Authorizer, PermissionQuery, VerificationCode, VerificationEvent, WildcardAuthorizer,
};
