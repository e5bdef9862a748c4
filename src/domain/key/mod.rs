//! Key domain
//!
//! Keys are secrets handed to end users. Only a hash is stored; verification
//! hashes the presented secret and looks it up.

mod entity;
mod repository;
mod validation;

pub use entity::{Key, Refill, RefillInterval};
pub use repository::{apply_remaining_op, KeyRepository, RemainingDecrement, RemainingOp};
pub use validation::{
    validate_byte_length, validate_permissions, validate_prefix, validate_usage,
    KeyValidationError, MAX_BYTE_LENGTH, MIN_BYTE_LENGTH,
};

#[cfg(test)]
pub use repository::MockKeyRepository;
