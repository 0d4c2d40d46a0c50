//! Core error types.

use thiserror::Error;

/// Errors constructing or validating core types.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid provider key: {0}")]
    InvalidKey(String),

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;
