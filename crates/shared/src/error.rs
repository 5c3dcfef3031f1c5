//! Error types for Huddle

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HuddleError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type HuddleResult<T> = Result<T, HuddleError>;
