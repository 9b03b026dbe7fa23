//! Blob persistence backends.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::id::BlobId;

/// Where blob bytes live, keyed by digest.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Persists `data` under `id`. Writing an id that already exists is a
    /// no-op, since equal ids imply equal contents.
    async fn write(&self, id: &BlobId, data: Bytes) -> Result<()>;

    /// Reads the blob stored under `id`, or `None` if there is none.
    async fn read(&self, id: &BlobId) -> Result<Option<Bytes>>;

    fn backend_name(&self) -> &'static str;
}

/// Stores each blob as a file named by its digest under one directory.
///
/// Writes go to a temporary file in the same directory and are renamed into
/// place, so readers never observe a partially written blob.
#[derive(Debug)]
pub struct FsBlobBackend {
    root: PathBuf,
    temp_seq: AtomicU64,
}

impl FsBlobBackend {
    /// Opens `root`, creating it if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            temp_seq: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, id: &BlobId) -> PathBuf {
        self.root.join(id.as_str())
    }

    fn temp_path(&self, id: &BlobId) -> PathBuf {
        let seq = self.temp_seq.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(format!(".{}.{}.{seq}.tmp", id.as_str(), std::process::id()))
    }
}

#[async_trait]
impl BlobBackend for FsBlobBackend {
    async fn write(&self, id: &BlobId, data: Bytes) -> Result<()> {
        let path = self.path_of(id);
        if tokio::fs::try_exists(&path).await? {
            debug!(id = %id, "blob already on disk");
            return Ok(());
        }

        let temp = self.temp_path(id);
        if let Err(err) = tokio::fs::write(&temp, &data).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(err.into());
        }
        // Concurrent writers of one id rename identical contents over each
        // other, which is harmless.
        if let Err(err) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn read(&self, id: &BlobId) -> Result<Option<Bytes>> {
        match tokio::fs::read(self.path_of(id)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn backend_name(&self) -> &'static str {
        "fs"
    }
}

/// Keeps blobs in process memory. Used by tests and ephemeral setups.
#[derive(Debug, Default)]
pub struct MemoryBlobBackend {
    blobs: RwLock<HashMap<BlobId, Bytes>>,
}

impl MemoryBlobBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

#[async_trait]
impl BlobBackend for MemoryBlobBackend {
    async fn write(&self, id: &BlobId, data: Bytes) -> Result<()> {
        self.blobs.write().entry(id.clone()).or_insert(data);
        Ok(())
    }

    async fn read(&self, id: &BlobId) -> Result<Option<Bytes>> {
        Ok(self.blobs.read().get(id).cloned())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
