//! Error types for the PostgreSQL entity store.

use livepipe_storage::StorageError;
use sqlx_core::error::Error as SqlxError;

/// PostgreSQL error code for unique_violation (23505).
pub const PG_UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL error code for foreign_key_violation (23503).
pub const PG_FOREIGN_KEY_VIOLATION: &str = "23503";

/// PostgreSQL error code for check_violation (23514).
pub const PG_CHECK_VIOLATION: &str = "23514";

/// Checks if a sqlx error has a specific PostgreSQL error code.
pub fn has_pg_error_code(err: &SqlxError, code: &str) -> bool {
    if let SqlxError::Database(db_err) = err {
        db_err.code().as_deref() == Some(code)
    } else {
        false
    }
}

/// Maps a failed statement to a [`StorageError`], recognizing constraint
/// violations on the given entity.
pub(crate) fn query_error(entity: &'static str, key: impl ToString, err: SqlxError) -> StorageError {
    if has_pg_error_code(&err, PG_UNIQUE_VIOLATION) {
        StorageError::already_exists(entity, key)
    } else if has_pg_error_code(&err, PG_FOREIGN_KEY_VIOLATION) {
        StorageError::constraint(format!("{entity} {}: {err}", key.to_string()))
    } else if has_pg_error_code(&err, PG_CHECK_VIOLATION) {
        StorageError::constraint(err.to_string())
    } else {
        match err {
            SqlxError::PoolTimedOut | SqlxError::PoolClosed | SqlxError::Io(_) => {
                StorageError::connection_error(err.to_string())
            }
            other => StorageError::internal(format!("Query on {entity} failed: {other}")),
        }
    }
}

/// Errors specific to the PostgreSQL backend.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database connection error.
    #[error("Database connection error: {0}")]
    Connection(#[from] sqlx_core::error::Error),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl PostgresError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<PostgresError> for StorageError {
    fn from(err: PostgresError) -> Self {
        match err {
            PostgresError::Connection(e) => StorageError::connection_error(e.to_string()),
            PostgresError::Migration(e) => StorageError::internal(format!("Migration error: {e}")),
            PostgresError::Config { message } => {
                StorageError::internal(format!("Configuration error: {message}"))
            }
        }
    }
}

/// Result type alias for PostgreSQL operations.
pub type Result<T> = std::result::Result<T, PostgresError>;
