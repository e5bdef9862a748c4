//! Infrastructure layer - Storage backends, counters and the services built on them

pub mod analytics;
pub mod apis;
pub mod identity;
pub mod key;
pub mod logging;
pub mod observability;
pub mod ratelimit;
pub mod storage;
pub mod verification;
