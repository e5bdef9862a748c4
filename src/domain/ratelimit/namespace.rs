//! Ratelimit namespaces and per-identifier overrides

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::id::{NamespaceId, OverrideId};
use crate::domain::storage::StorageEntity;
use crate::domain::DomainError;

/// Maximum length of a namespace name or override identifier
pub const MAX_NAME_LENGTH: usize = 256;

/// A group of identifiers limited through `ratelimits.limit`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatelimitNamespace {
    pub id: NamespaceId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl RatelimitNamespace {
    pub fn new(name: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into();
        validate_name("Namespace name", &name)?;

        Ok(Self {
            id: NamespaceId::generate(),
            name,
            created_at: Utc::now(),
        })
    }
}

impl StorageEntity for RatelimitNamespace {
    type Key = NamespaceId;

    const TABLE: &'static str = "ratelimit_namespaces";

    fn key(&self) -> &Self::Key {
        &self.id
    }
}

/// Replaces the caller-provided limit for identifiers matching `identifier`
///
/// `identifier` may contain `*`, matching any run of characters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatelimitOverride {
    pub id: OverrideId,
    pub namespace_id: NamespaceId,
    pub identifier: String,
    pub limit: i64,
    pub duration_ms: i64,
    #[serde(default, rename = "async")]
    pub is_async: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RatelimitOverride {
    pub fn new(
        namespace_id: NamespaceId,
        identifier: impl Into<String>,
        limit: i64,
        duration_ms: i64,
    ) -> Result<Self, DomainError> {
        let identifier = identifier.into();
        validate_name("Override identifier", &identifier)?;
        validate_window(limit, duration_ms)?;

        let now = Utc::now();

        Ok(Self {
            id: OverrideId::generate(),
            namespace_id,
            identifier,
            limit,
            duration_ms,
            is_async: false,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_async(mut self, is_async: bool) -> Self {
        self.is_async = is_async;
        self
    }

    pub fn is_wildcard(&self) -> bool {
        self.identifier.contains('*')
    }

    /// Whether this override applies to `identifier`
    pub fn matches(&self, identifier: &str) -> bool {
        if self.is_wildcard() {
            wildcard_match(&self.identifier, identifier)
        } else {
            self.identifier == identifier
        }
    }
}

impl StorageEntity for RatelimitOverride {
    type Key = OverrideId;

    const TABLE: &'static str = "ratelimit_overrides";

    fn key(&self) -> &Self::Key {
        &self.id
    }
}

/// Pick the override for `identifier`: an exact match wins, then the longest
/// matching wildcard pattern
pub fn select_override<'a>(
    overrides: &'a [RatelimitOverride],
    identifier: &str,
) -> Option<&'a RatelimitOverride> {
    if let Some(exact) = overrides
        .iter()
        .find(|o| !o.is_wildcard() && o.identifier == identifier)
    {
        return Some(exact);
    }

    overrides
        .iter()
        .filter(|o| o.is_wildcard() && o.matches(identifier))
        .max_by_key(|o| o.identifier.len())
}

/// Glob match where `*` matches any (possibly empty) run of characters
fn wildcard_match(pattern: &str, input: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();

    if parts.len() == 1 {
        return pattern == input;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];

    if input.len() < first.len() + last.len()
        || !input.starts_with(first)
        || !input.ends_with(last)
    {
        return false;
    }

    let mut rest = &input[first.len()..input.len() - last.len()];

    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }

    true
}

fn validate_name(field: &str, value: &str) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(format!("{} cannot be empty", field)));
    }

    if value.len() > MAX_NAME_LENGTH {
        return Err(DomainError::validation(format!(
            "{} exceeds maximum length of {} characters",
            field, MAX_NAME_LENGTH
        )));
    }

    Ok(())
}

pub(crate) fn validate_window(limit: i64, duration_ms: i64) -> Result<(), DomainError> {
    if limit <= 0 {
        return Err(DomainError::validation(format!(
            "limit must be positive, got {}",
            limit
        )));
    }

    if duration_ms <= 0 {
        return Err(DomainError::validation(format!(
            "duration must be positive, got {}",
            duration_ms
        )));
    }

    Ok(())
}
