//! Common error types for 5min Talk components.

use thiserror::Error;

/// Errors raised while parsing or validating shared types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    /// Identifier is not a valid UUID
    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    /// Language code is malformed
    #[error("Invalid language code: {0}")]
    InvalidLanguageCode(String),
}
