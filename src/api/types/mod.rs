//! Request and response plumbing shared by all handlers

pub mod error;
pub mod json;
pub mod nullable;

pub use error::{ApiError, ApiErrorResponse, ErrorCode};
pub use json::{Json, ValidatedJson};
pub use nullable::nullable;
