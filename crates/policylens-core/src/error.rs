//! Error taxonomy for the interpretation engine.
//!
//! [`ValidationError`] and [`CoreError::DuplicateTask`] are raised
//! synchronously to the submitting caller. [`AdapterError`] never reaches the
//! caller: the runner records it as the failure reason of the task.

use std::time::Duration;

use thiserror::Error;

/// A submission or query was rejected before any state changed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("a contract document (PDF) is required")]
    MissingPrimaryDocument,

    #[error("exactly one contract document is allowed, got {count}")]
    MultiplePrimaryDocuments { count: usize },

    #[error("file {file_name} must be {expected} format")]
    WrongType {
        file_name: String,
        expected: &'static str,
    },

    #[error("maximum {max} image files allowed, got {count}")]
    TooManySupplementaryFiles { count: usize, max: usize },

    #[error("file {file_name} is {size_bytes} bytes, exceeding the limit of {max_bytes} bytes")]
    FileTooLarge {
        file_name: String,
        size_bytes: u64,
        max_bytes: u64,
    },

    #[error("file {file_name} is empty")]
    EmptyFile { file_name: String },

    #[error("invalid pagination: {0}")]
    InvalidPagination(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// The interpreter call failed. Recorded as the task's failure reason.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("interpretation timed out after {0:?}")]
    Timeout(Duration),

    #[error("interpreter returned error: {status} - {message}")]
    Remote { status: u16, message: String },

    #[error("malformed interpretation response: {0}")]
    Malformed(String),

    #[error("interpreter unreachable: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AdapterError::Transport(format!("request timed out: {err}"))
        } else {
            AdapterError::Transport(err.to_string())
        }
    }
}

/// All errors surfaced by the core's synchronous operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("an interpretation task for '{task_name}' ({company}) is already in progress")]
    DuplicateTask { task_name: String, company: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("staging error: {0}")]
    Staging(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// True for the errors a client caused and can correct.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CoreError::Validation(_) | CoreError::DuplicateTask { .. } | CoreError::NotFound(_)
        )
    }
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
