//! Errors surfaced by repository operations.

use std::fmt;

use thiserror::Error;

use livepipe_blob::BlobError;
use livepipe_storage::{ErrorCategory, StorageError};

/// Errors returned by [`Repository`](crate::Repository) and
/// [`ReservationAllocator`](crate::ReservationAllocator) operations.
///
/// Running out of reservation capacity is not an error; it is reported as
/// [`ReserveOutcome::CapacityExceeded`](crate::ReserveOutcome::CapacityExceeded).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error(transparent)]
    Store(#[from] StorageError),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A cached entry refers to a row that no longer exists.
    #[error("inconsistent cache state in {cache}: {key}")]
    InconsistentCacheState { cache: &'static str, key: String },
}

impl CoreError {
    #[must_use]
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Classifies the error for the request layer.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Store(err) => match err.category() {
                ErrorCategory::NotFound => ErrorKind::NotFound,
                ErrorCategory::Conflict => ErrorKind::Conflict,
                ErrorCategory::Validation => ErrorKind::InvalidRequest,
                ErrorCategory::Transaction
                | ErrorCategory::Infrastructure
                | ErrorCategory::Internal => ErrorKind::Internal,
            },
            Self::Blob(BlobError::InvalidId(_) | BlobError::TooLarge { .. }) => {
                ErrorKind::InvalidRequest
            }
            Self::Blob(BlobError::Io(_)) => ErrorKind::Internal,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::InconsistentCacheState { .. } => ErrorKind::Internal,
        }
    }
}

/// Coarse error classes a request layer maps to responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidRequest,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::InvalidRequest => write!(f, "invalid_request"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
