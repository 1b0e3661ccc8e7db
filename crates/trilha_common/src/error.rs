//! Error types for lesson-completion input.

use thiserror::Error;

/// Malformed lesson completion, rejected before any transaction starts
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Malformed lesson completion payload: {0}")]
    Malformed(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Field {field} must be numeric")]
    NotNumeric { field: &'static str },

    #[error("Field {field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("Field {0} must not be empty")]
    Empty(&'static str),
}

impl ValidationError {
    pub fn code(&self) -> i32 {
        match self {
            ValidationError::Malformed(_) => -32700,
            ValidationError::MissingField(_) => -32602,
            ValidationError::NotNumeric { .. } => -32602,
            ValidationError::OutOfRange { .. } => -32602,
            ValidationError::Empty(_) => -32602,
        }
    }

    /// Name of the offending field, when known
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ValidationError::Malformed(_) => None,
            ValidationError::MissingField(f) | ValidationError::Empty(f) => Some(f),
            ValidationError::NotNumeric { field } | ValidationError::OutOfRange { field, .. } => {
                Some(field)
            }
        }
    }
}
