//! Key creation and update validation

use thiserror::Error;

use super::entity::{Refill, RefillInterval};
use crate::domain::DomainError;

/// Smallest allowed amount of random bytes in a generated key
pub const MIN_BYTE_LENGTH: usize = 16;

/// Largest allowed amount of random bytes in a generated key
pub const MAX_BYTE_LENGTH: usize = 255;

/// Maximum length of a key prefix
pub const MAX_PREFIX_LENGTH: usize = 16;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum KeyValidationError {
    #[error("Key prefix exceeds maximum length of {0} characters")]
    PrefixTooLong(usize),

    #[error("Key prefix contains invalid character: '{0}'. Only alphanumeric characters are allowed")]
    InvalidPrefixCharacter(char),

    #[error("byteLength must be between {MIN_BYTE_LENGTH} and {MAX_BYTE_LENGTH}, got {0}")]
    ByteLengthOutOfRange(usize),

    #[error("remaining cannot be negative, got {0}")]
    NegativeRemaining(i64),

    #[error("refill amount must be positive, got {0}")]
    InvalidRefillAmount(i64),

    #[error("refillDay must be between 1 and 31, got {0}")]
    InvalidRefillDay(u32),

    #[error("refillDay is only allowed for monthly refills")]
    RefillDayNotAllowed,

    #[error("refill requires remaining to be set")]
    RefillWithoutRemaining,

    #[error("Permission names cannot be empty")]
    EmptyPermission,

    #[error("Key cannot be empty")]
    EmptyKey,
}

impl From<KeyValidationError> for DomainError {
    fn from(err: KeyValidationError) -> Self {
        DomainError::validation(err.to_string())
    }
}

/// Validate a key prefix
pub fn validate_prefix(prefix: &str) -> Result<(), KeyValidationError> {
    if prefix.len() > MAX_PREFIX_LENGTH {
        return Err(KeyValidationError::PrefixTooLong(MAX_PREFIX_LENGTH));
    }

    if let Some(c) = prefix.chars().find(|c| !c.is_ascii_alphanumeric()) {
        return Err(KeyValidationError::InvalidPrefixCharacter(c));
    }

    Ok(())
}

pub fn validate_byte_length(byte_length: usize) -> Result<(), KeyValidationError> {
    if !(MIN_BYTE_LENGTH..=MAX_BYTE_LENGTH).contains(&byte_length) {
        return Err(KeyValidationError::ByteLengthOutOfRange(byte_length));
    }

    Ok(())
}

/// Validate usage limit settings; a refill only makes sense for a limited key
pub fn validate_usage(remaining: Option<i64>, refill: Option<&Refill>) -> Result<(), KeyValidationError> {
    if let Some(value) = remaining {
        if value < 0 {
            return Err(KeyValidationError::NegativeRemaining(value));
        }
    }

    if let Some(refill) = refill {
        if remaining.is_none() {
            return Err(KeyValidationError::RefillWithoutRemaining);
        }

        if refill.amount <= 0 {
            return Err(KeyValidationError::InvalidRefillAmount(refill.amount));
        }

        match (refill.interval, refill.refill_day) {
            (RefillInterval::Daily, Some(_)) => return Err(KeyValidationError::RefillDayNotAllowed),
            (RefillInterval::Monthly, Some(day)) if !(1..=31).contains(&day) => {
                return Err(KeyValidationError::InvalidRefillDay(day));
            }
            _ => {}
        }
    }

    Ok(())
}

pub fn validate_permissions(permissions: &[String]) -> Result<(), KeyValidationError> {
    if permissions.iter().any(|p| p.trim().is_empty()) {
        return Err(KeyValidationError::EmptyPermission);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_prefix() {
        assert!(validate_prefix("sk").is_ok());
        assert!(validate_prefix("").is_ok());
        assert_eq!(
            validate_prefix("sk_live"),
            Err(KeyValidationError::InvalidPrefixCharacter('_'))
        );
        assert_eq!(
            validate_prefix(&"a".repeat(17)),
            Err(KeyValidationError::PrefixTooLong(MAX_PREFIX_LENGTH))
        );
    }

    #[test]
    fn test_validate_byte_length() {
        assert!(validate_byte_length(16).is_ok());
        assert!(validate_byte_length(255).is_ok());
        assert!(validate_byte_length(15).is_err());
        assert!(validate_byte_length(256).is_err());
    }

    #[test]
    fn test_validate_usage() {
        assert!(validate_usage(None, None).is_ok());
        assert!(validate_usage(Some(0), None).is_ok());
        assert_eq!(
            validate_usage(Some(-1), None),
            Err(KeyValidationError::NegativeRemaining(-1))
        );
        assert_eq!(
            validate_usage(None, Some(&Refill::daily(10))),
            Err(KeyValidationError::RefillWithoutRemaining)
        );
        assert_eq!(
            validate_usage(Some(10), Some(&Refill::monthly(10, 32))),
            Err(KeyValidationError::InvalidRefillDay(32))
        );

        let daily_with_day = Refill {
            interval: RefillInterval::Daily,
            amount: 10,
            refill_day: Some(3),
        };
        assert_eq!(
            validate_usage(Some(10), Some(&daily_with_day)),
            Err(KeyValidationError::RefillDayNotAllowed)
        );
    }

    #[test]
    fn test_validation_error_converts_to_domain_error() {
        let err: DomainError = KeyValidationError::EmptyKey.into();
        assert!(matches!(err, DomainError::Validation { .. }));
    }
}
