//! Verification infrastructure

mod service;

pub use service::{KeyVerification, VerificationService, VerifyKey};
