use thiserror::Error;

/// Errors from blob operations.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("invalid blob id: {0:?}")]
    InvalidId(String),

    #[error("blob too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },

    #[error("blob I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl BlobError {
    /// Whether the failure came from the backend rather than the input.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, BlobError>;
