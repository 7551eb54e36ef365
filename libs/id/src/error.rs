//! Error types for id parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating ids.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The id string is empty.
    #[error("id cannot be empty")]
    Empty,

    /// The node id is not 32 lowercase hex characters.
    #[error("node id should be 128bit lowercase hex format, got '{0}'")]
    InvalidNodeId(String),

    /// The uuid portion could not be parsed.
    #[error("invalid uuid ({value}): {message}")]
    InvalidUuid { value: String, message: String },

    /// The account uuid is not a 64 char lowercase hex digest.
    #[error("account uuid should be a sha256 hex digest, got '{0}'")]
    InvalidAccountUuid(String),
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }
}
