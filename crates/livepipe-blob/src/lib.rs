//! # livepipe-blob
//!
//! Content-addressed storage for icon images.
//!
//! Blobs are stored under the lowercase hex SHA-256 digest of their bytes,
//! so [`BlobStore::put`] is idempotent. [`BlobStore::get`] never fails: a
//! missing or unreadable blob resolves to the fallback blob registered at
//! construction.

mod backend;
mod error;
mod id;
mod store;

pub use backend::{BlobBackend, FsBlobBackend, MemoryBlobBackend};
pub use error::{BlobError, Result};
pub use id::BlobId;
pub use store::{Blob, BlobStore, MAX_BLOB_SIZE};
