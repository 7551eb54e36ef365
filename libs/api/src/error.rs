//! Validation errors.

use thiserror::Error;

/// The first invariant a resource violates.
///
/// `field` is a dotted path into the JSON document, e.g.
/// `spec.containers[0].image`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is empty or absent.
    #[error("{field} should be specified")]
    Missing { field: String },

    /// A field is present but malformed.
    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },

    /// A value that must be unique appears twice.
    #[error("{field} should be unique, '{value}' appears more than once")]
    Duplicate { field: String, value: String },

    /// Two collections that must have the same length do not.
    #[error("{field} should have {expected} entries, got {actual}")]
    CountMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },

    /// `meta.type` does not match the resource.
    #[error("meta.type should be {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },
}

impl ValidationError {
    pub fn missing(field: impl Into<String>) -> Self {
        Self::Missing {
            field: field.into(),
        }
    }

    pub fn invalid(field: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns the path of the offending field.
    pub fn field(&self) -> &str {
        match self {
            Self::Missing { field }
            | Self::Invalid { field, .. }
            | Self::Duplicate { field, .. }
            | Self::CountMismatch { field, .. } => field,
            Self::TypeMismatch { .. } => "meta.type",
        }
    }
}
