//! Error types for the progression engine.

use thiserror::Error;
use trilha_common::ValidationError;

/// Failure reported by a storage collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Another transaction holds this user's rows; safe to retry
    #[error("Concurrent update in progress: {0}")]
    Conflict(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(
                    e.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                StoreError::Conflict(err.to_string())
            }
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

/// Failure of an engine operation as seen by the controller
#[derive(Error, Debug)]
pub enum ProgressionError {
    #[error("Invalid lesson completion: {0}")]
    Validation(#[from] ValidationError),

    #[error("Progression update conflicted {attempts} times: {detail}")]
    ConcurrencyConflict { attempts: u32, detail: String },

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl ProgressionError {
    pub fn code(&self) -> i32 {
        match self {
            ProgressionError::Validation(e) => e.code(),
            ProgressionError::ConcurrencyConflict { .. } => -32009,
            ProgressionError::Persistence(_) => -32004,
        }
    }
}

impl From<StoreError> for ProgressionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(detail) => ProgressionError::ConcurrencyConflict {
                attempts: 1,
                detail,
            },
            StoreError::Backend(msg) => ProgressionError::Persistence(msg),
        }
    }
}
