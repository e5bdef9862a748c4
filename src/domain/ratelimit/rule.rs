//! Named ratelimit rules attached to keys and identities

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::DomainError;

/// Maximum length of a rule name
pub const MAX_RULE_NAME_LENGTH: usize = 128;

/// A fixed-window rate limit owned by a key or an identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatelimitRule {
    pub name: String,
    /// Requests allowed per window
    pub limit: i64,
    /// Window length in milliseconds
    pub duration_ms: i64,
    /// Charged on every verification even when not requested
    #[serde(default)]
    pub auto_apply: bool,
    /// Fail open when the counter backend is unavailable
    #[serde(default, rename = "async")]
    pub is_async: bool,
}

impl RatelimitRule {
    pub fn new(name: impl Into<String>, limit: i64, duration_ms: i64) -> Self {
        Self {
            name: name.into(),
            limit,
            duration_ms,
            auto_apply: false,
            is_async: false,
        }
    }

    pub fn with_auto_apply(mut self, auto_apply: bool) -> Self {
        self.auto_apply = auto_apply;
        self
    }

    pub fn with_async(mut self, is_async: bool) -> Self {
        self.is_async = is_async;
        self
    }

    pub fn validate(&self) -> Result<(), RatelimitRuleError> {
        if self.name.trim().is_empty() {
            return Err(RatelimitRuleError::EmptyName);
        }

        if self.name.len() > MAX_RULE_NAME_LENGTH {
            return Err(RatelimitRuleError::NameTooLong(MAX_RULE_NAME_LENGTH));
        }

        if self.limit <= 0 {
            return Err(RatelimitRuleError::InvalidLimit(self.name.clone(), self.limit));
        }

        if self.duration_ms <= 0 {
            return Err(RatelimitRuleError::InvalidDuration(
                self.name.clone(),
                self.duration_ms,
            ));
        }

        Ok(())
    }
}

/// Errors raised when validating ratelimit rules
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RatelimitRuleError {
    #[error("Ratelimit name cannot be empty")]
    EmptyName,

    #[error("Ratelimit name exceeds maximum length of {0} characters")]
    NameTooLong(usize),

    #[error("Ratelimit '{0}' must have a positive limit, got {1}")]
    InvalidLimit(String, i64),

    #[error("Ratelimit '{0}' must have a positive duration, got {1}")]
    InvalidDuration(String, i64),

    #[error("Ratelimit name '{0}' is used more than once")]
    DuplicateName(String),
}

impl From<RatelimitRuleError> for DomainError {
    fn from(err: RatelimitRuleError) -> Self {
        DomainError::validation(err.to_string())
    }
}

/// Validate a set of rules belonging to a single owner
pub fn validate_rules(rules: &[RatelimitRule]) -> Result<(), RatelimitRuleError> {
    let mut seen = HashSet::with_capacity(rules.len());

    for rule in rules {
        rule.validate()?;

        if !seen.insert(rule.name.as_str()) {
            return Err(RatelimitRuleError::DuplicateName(rule.name.clone()));
        }
    }

    Ok(())
}

/// Merge identity rules with key rules; a key rule replaces an identity rule of the same name
pub fn merge_rules(identity_rules: &[RatelimitRule], key_rules: &[RatelimitRule]) -> Vec<RatelimitRule> {
    let mut merged: Vec<RatelimitRule> = identity_rules
        .iter()
        .filter(|rule| !key_rules.iter().any(|k| k.name == rule.name))
        .cloned()
        .collect();

    merged.extend(key_rules.iter().cloned());
    merged
}

/// A request to charge a named rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatelimitRequest {
    pub name: String,
    #[serde(default = "default_cost")]
    pub cost: i64,
}

fn default_cost() -> i64 {
    1
}

impl RatelimitRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cost: default_cost(),
        }
    }

    pub fn with_cost(mut self, cost: i64) -> Self {
        self.cost = cost;
        self
    }
}

/// Outcome of evaluating one rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatelimitResult {
    pub name: String,
    pub passed: bool,
    pub limit: i64,
    pub remaining: i64,
    /// Unix timestamp in milliseconds at which the current window ends
    pub reset_at: i64,
}
