//! Entity identifiers
//!
//! Every entity is addressed by an opaque string carrying a short type prefix,
//! for example `key_3f9c2b...` or `api_0d41...`. Identifiers supplied by callers
//! (such as the configured root API id) only need to match the general pattern.

use once_cell::sync::Lazy;
use regex::Regex;

use super::error::DomainError;

/// Regex pattern for valid entity IDs
static ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_-]*$").unwrap());

/// Maximum length for entity IDs
pub const MAX_ID_LENGTH: usize = 64;

/// Validate an entity ID string
pub fn validate_entity_id(kind: &str, id: &str) -> Result<(), DomainError> {
    if id.is_empty() {
        return Err(DomainError::invalid_id(format!("{} ID cannot be empty", kind)));
    }

    if id.len() > MAX_ID_LENGTH {
        return Err(DomainError::invalid_id(format!(
            "{} ID exceeds maximum length of {} characters",
            kind, MAX_ID_LENGTH
        )));
    }

    if !ID_PATTERN.is_match(id) {
        return Err(DomainError::invalid_id(format!(
            "Invalid {} ID '{}': only alphanumeric characters, '_' and '-' are allowed",
            kind, id
        )));
    }

    Ok(())
}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a new validated ID
            pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
                let id = id.into();
                validate_entity_id($kind, &id)?;
                Ok(Self(id))
            }

            /// Generate a fresh random ID
            pub fn generate() -> Self {
                Self(format!("{}_{}", $prefix, uuid::Uuid::new_v4().simple()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl crate::domain::storage::StorageKey for $name {
            fn as_str(&self) -> &str {
                &self.0
            }
        }
    };
}

entity_id!(
    /// Identifier of a key
    KeyId,
    "key",
    "Key"
);
entity_id!(
    /// Identifier of an API (a group of keys)
    ApiId,
    "api",
    "API"
);
entity_id!(
    /// Identifier of an identity
    IdentityId,
    "id",
    "Identity"
);
entity_id!(
    /// Identifier of a ratelimit namespace
    NamespaceId,
    "rlns",
    "Namespace"
);
entity_id!(
    /// Identifier of a ratelimit override
    OverrideId,
    "rlor",
    "Override"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_uses_prefix() {
        let id = KeyId::generate();
        assert!(id.as_str().starts_with("key_"));
        assert!(KeyId::new(id.as_str()).is_ok());

        assert!(ApiId::generate().as_str().starts_with("api_"));
        assert!(NamespaceId::generate().as_str().starts_with("rlns_"));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(IdentityId::generate(), IdentityId::generate());
    }

    #[test]
    fn test_rejects_invalid_ids() {
        assert!(KeyId::new("").is_err());
        assert!(KeyId::new("_leading").is_err());
        assert!(KeyId::new("has space").is_err());
        assert!(KeyId::new("a".repeat(MAX_ID_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_accepts_caller_supplied_ids() {
        let id = ApiId::new("api_root").unwrap();
        assert_eq!(id.to_string(), "api_root");
        assert_eq!(String::from(id), "api_root");
    }

    #[test]
    fn test_serde_validates() {
        let parsed: Result<KeyId, _> = serde_json::from_str("\"bad id\"");
        assert!(parsed.is_err());

        let parsed: KeyId = serde_json::from_str("\"key_abc\"").unwrap();
        assert_eq!(parsed.as_str(), "key_abc");
    }
}
