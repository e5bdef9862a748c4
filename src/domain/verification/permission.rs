//! Permission queries and the authorizer that evaluates them

use serde::{Deserialize, Serialize};

/// A boolean expression over permission names
///
/// Serialized as a plain string, `{"and": [...]}` or `{"or": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PermissionQuery {
    Permission(String),
    And { and: Vec<PermissionQuery> },
    Or { or: Vec<PermissionQuery> },
}

impl PermissionQuery {
    pub fn permission(name: impl Into<String>) -> Self {
        Self::Permission(name.into())
    }
}

/// Decides whether a set of granted permissions satisfies a requirement
pub trait Authorizer: Send + Sync {
    fn is_granted(&self, granted: &[String], required: &str) -> bool;

    fn evaluate(&self, granted: &[String], query: &PermissionQuery) -> bool {
        match query {
            PermissionQuery::Permission(name) => self.is_granted(granted, name),
            PermissionQuery::And { and } => and.iter().all(|q| self.evaluate(granted, q)),
            PermissionQuery::Or { or } => or.iter().any(|q| self.evaluate(granted, q)),
        }
    }
}

/// Matches dot-separated permissions where a granted `*` segment matches any
/// single segment and a lone `*` grants everything
#[derive(Debug, Clone, Copy, Default)]
pub struct WildcardAuthorizer;

impl WildcardAuthorizer {
    pub fn new() -> Self {
        Self
    }

    fn matches(pattern: &str, required: &str) -> bool {
        if pattern == "*" || pattern == required {
            return true;
        }

        let pattern_segments: Vec<&str> = pattern.split('.').collect();
        let required_segments: Vec<&str> = required.split('.').collect();

        pattern_segments.len() == required_segments.len()
            && pattern_segments
                .iter()
                .zip(&required_segments)
                .all(|(p, r)| *p == "*" || p == r)
    }
}

impl Authorizer for WildcardAuthorizer {
    fn is_granted(&self, granted: &[String], required: &str) -> bool {
        granted.iter().any(|pattern| Self::matches(pattern, required))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn granted(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_exact_permission() {
        let authorizer = WildcardAuthorizer::new();
        let perms = granted(&["documents.read"]);

        assert!(authorizer.is_granted(&perms, "documents.read"));
        assert!(!authorizer.is_granted(&perms, "documents.write"));
    }

    #[test]
    fn test_wildcard_segment() {
        let authorizer = WildcardAuthorizer::new();
        let perms = granted(&["api.*.create_key"]);

        assert!(authorizer.is_granted(&perms, "api.api_123.create_key"));
        assert!(authorizer.is_granted(&perms, "api.*.create_key"));
        assert!(!authorizer.is_granted(&perms, "api.api_123.delete_key"));
        assert!(!authorizer.is_granted(&perms, "api.create_key"));
    }

    #[test]
    fn test_lone_star_grants_everything() {
        let authorizer = WildcardAuthorizer::new();
        assert!(authorizer.is_granted(&granted(&["*"]), "ratelimit.ns.delete_override"));
    }

    #[test]
    fn test_query_parsing() {
        let query: PermissionQuery =
            serde_json::from_str(r#"{"and": ["a.read", {"or": ["b.read", "c.read"]}]}"#).unwrap();

        assert_eq!(
            query,
            PermissionQuery::And {
                and: vec![
                    PermissionQuery::permission("a.read"),
                    PermissionQuery::Or {
                        or: vec![
                            PermissionQuery::permission("b.read"),
                            PermissionQuery::permission("c.read"),
                        ]
                    },
                ]
            }
        );
    }

    #[test]
    fn test_query_evaluation() {
        let authorizer = WildcardAuthorizer::new();
        let perms = granted(&["a.read", "c.read"]);

        let query: PermissionQuery =
            serde_json::from_str(r#"{"and": ["a.read", {"or": ["b.read", "c.read"]}]}"#).unwrap();
        assert!(authorizer.evaluate(&perms, &query));

        let query: PermissionQuery =
            serde_json::from_str(r#"{"and": ["a.read", "b.read"]}"#).unwrap();
        assert!(!authorizer.evaluate(&perms, &query));
    }
}
