//! Cache error types.

/// Errors raised by an [`InvalidationSink`](crate::InvalidationSink).
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Deleting a cache entry failed.
    #[error("Failed to invalidate {key}: {message}")]
    Invalidation { key: String, message: String },
}

impl CacheError {
    /// Creates a new `Invalidation` error.
    #[must_use]
    pub fn invalidation(key: impl ToString, message: impl Into<String>) -> Self {
        Self::Invalidation {
            key: key.to_string(),
            message: message.into(),
        }
    }
}
