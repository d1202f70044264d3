//! Shared service utilities.

pub mod error;
pub mod json_ld;

pub use error::ServiceError;
pub use json_ld::JsonLdContext;
