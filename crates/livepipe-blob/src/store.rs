//! The content-addressed blob store.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, instrument, warn};

use livepipe_cache::{CacheStats, ReadThroughCache};

use crate::backend::BlobBackend;
use crate::error::{BlobError, Result};
use crate::id::BlobId;

/// Largest blob accepted by [`BlobStore::put`] (16 MiB).
pub const MAX_BLOB_SIZE: u64 = 16 * 1024 * 1024;

/// Bytes returned by [`BlobStore::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    /// Digest of `data`. For a fallback this is the fallback's id, not the
    /// id that was requested.
    pub id: BlobId,
    pub data: Bytes,
    pub is_fallback: bool,
}

/// Stores blobs under their SHA-256 digest and serves a fallback blob for
/// anything missing or unreadable.
///
/// Blobs are immutable, so reads are cached in memory without invalidation.
pub struct BlobStore {
    backend: Arc<dyn BlobBackend>,
    fallback: Bytes,
    fallback_id: BlobId,
    cache: ReadThroughCache<BlobId, Bytes>,
}

impl BlobStore {
    /// Builds a store over `backend` and registers `fallback` in it.
    pub async fn new(backend: Arc<dyn BlobBackend>, fallback: Bytes) -> Result<Self> {
        check_size(fallback.len())?;
        let fallback_id = BlobId::digest(&fallback);
        backend.write(&fallback_id, fallback.clone()).await?;
        debug!(
            backend = backend.backend_name(),
            fallback = %fallback_id,
            "blob store ready"
        );
        Ok(Self {
            backend,
            fallback,
            fallback_id,
            cache: ReadThroughCache::new("blobs"),
        })
    }

    /// Like [`BlobStore::new`], reading the fallback blob from `path`.
    pub async fn with_fallback_file(
        backend: Arc<dyn BlobBackend>,
        path: impl AsRef<Path>,
    ) -> Result<Self> {
        let fallback = tokio::fs::read(path.as_ref()).await?;
        Self::new(backend, Bytes::from(fallback)).await
    }

    pub fn fallback_id(&self) -> &BlobId {
        &self.fallback_id
    }

    /// Stores `data` and returns its digest. Repeating a put, concurrently
    /// or not, yields the same id and leaves one stored copy.
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn put(&self, data: Bytes) -> Result<BlobId> {
        check_size(data.len())?;
        let id = BlobId::digest(&data);
        self.backend.write(&id, data).await?;
        debug!(id = %id, "blob stored");
        Ok(id)
    }

    /// Returns the blob stored under `id`, or the fallback blob if it is
    /// missing or cannot be read. Never fails.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn get(&self, id: &BlobId) -> Blob {
        if *id == self.fallback_id {
            return self.fallback_blob();
        }
        let backend = &self.backend;
        let loaded = self
            .cache
            .fetch(id.clone(), async { backend.read(id).await })
            .await;

        match loaded {
            Ok(Some(data)) => Blob {
                id: id.clone(),
                data,
                is_fallback: false,
            },
            Ok(None) => {
                debug!("blob missing, serving fallback");
                self.fallback_blob()
            }
            Err(err) => {
                warn!(error = %err, "blob unreadable, serving fallback");
                self.fallback_blob()
            }
        }
    }

    /// Like [`BlobStore::get`] for a digest that has not been validated.
    /// Malformed digests resolve to the fallback blob.
    pub async fn get_by_digest(&self, digest: &str) -> Blob {
        match BlobId::parse(digest) {
            Ok(id) => self.get(&id).await,
            Err(err) => {
                warn!(error = %err, "serving fallback for malformed digest");
                self.fallback_blob()
            }
        }
    }

    pub fn fallback_blob(&self) -> Blob {
        Blob {
            id: self.fallback_id.clone(),
            data: self.fallback.clone(),
            is_fallback: true,
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

impl std::fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStore")
            .field("backend", &self.backend.backend_name())
            .field("fallback_id", &self.fallback_id)
            .field("cached", &self.cache.len())
            .finish()
    }
}

fn check_size(len: usize) -> Result<()> {
    let size = len as u64;
    if size > MAX_BLOB_SIZE {
        return Err(BlobError::TooLarge {
            size,
            max: MAX_BLOB_SIZE,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BlobBackend, MemoryBlobBackend};

    #[test]
    fn size_limit() {
        assert!(check_size(MAX_BLOB_SIZE as usize).is_ok());
        assert!(matches!(
            check_size(MAX_BLOB_SIZE as usize + 1),
            Err(BlobError::TooLarge { max: MAX_BLOB_SIZE, .. })
        ));
    }

    #[tokio::test]
    async fn fallback_is_registered_in_the_backend() {
        let backend = Arc::new(MemoryBlobBackend::new());
        let store = BlobStore::new(backend.clone(), Bytes::from_static(b"no image"))
            .await
            .unwrap();
        assert_eq!(backend.len(), 1);
        assert_eq!(
            backend.read(store.fallback_id()).await.unwrap(),
            Some(Bytes::from_static(b"no image"))
        );

        let blob = store.get(store.fallback_id()).await;
        assert!(blob.is_fallback);
        assert_eq!(store.cache_stats().misses, 0);
    }
}
