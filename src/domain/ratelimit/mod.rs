//! Ratelimit domain
//!
//! Named fixed-window rules owned by keys and identities, the counter store
//! they are charged against, and the namespaces/overrides used by standalone
//! ratelimiting.

mod counter;
mod namespace;
mod repository;
mod rule;

pub use counter::{CounterCharge, CounterStore};
pub use namespace::{select_override, RatelimitNamespace, RatelimitOverride};
pub(crate) use namespace::validate_window;
pub use repository::{NamespaceRepository, OverrideRepository};
pub use rule::{
    merge_rules, validate_rules, RatelimitRequest, RatelimitResult, RatelimitRule,
    RatelimitRuleError,
};

#[cfg(test)]
pub use counter::MockCounterStore;
