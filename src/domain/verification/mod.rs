//! Verification domain - outcome codes, events and permission checks

mod outcome;
mod permission;

pub use outcome::{VerificationCode, VerificationEvent};
pub use permission::{Authorizer, PermissionQuery, WildcardAuthorizer};
