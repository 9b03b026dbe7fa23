//! Wiring of the store, caches, blob store and repository.

use std::sync::Arc;

use anyhow::Context;
use livepipe_blob::{BlobBackend, BlobStore, FsBlobBackend, MemoryBlobBackend};
use livepipe_cache::CacheRegistry;
use livepipe_db_postgres::{PostgresStore, mask_password};
use livepipe_repository::{ReservationAllocator, Repository};
use livepipe_storage::DynEntityStore;

use crate::config::{AppConfig, BlobBackendKind, StorageBackend};

/// Everything a request handler needs, shared behind `Arc`s.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub repository: Arc<Repository>,
}

impl AppState {
    pub async fn build(config: AppConfig) -> anyhow::Result<Self> {
        let store = build_store(&config).await?;
        let blobs = Arc::new(build_blob_store(&config).await?);
        let caches = Arc::new(CacheRegistry::new());
        let allocator = ReservationAllocator::new(config.reservations.term());

        let repository = Arc::new(Repository::new(store, caches, blobs, allocator));
        Ok(Self {
            config: Arc::new(config),
            repository,
        })
    }
}

async fn build_store(config: &AppConfig) -> anyhow::Result<DynEntityStore> {
    match config.storage.backend {
        StorageBackend::Postgres => {
            let pg = config
                .storage
                .postgres
                .clone()
                .context("storage.postgres section is required for the postgres backend")?;
            let url = mask_password(&pg.url);
            tracing::info!(url = %url, pool_size = pg.pool_size, "Connecting to PostgreSQL");
            let store = PostgresStore::new(pg)
                .await
                .with_context(|| format!("failed to open PostgreSQL store at {url}"))?;
            let store: DynEntityStore = Arc::new(store);
            Ok(store)
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; data is lost on exit");
            Ok(livepipe_db_memory::create_entity_store())
        }
    }
}

async fn build_blob_store(config: &AppConfig) -> anyhow::Result<BlobStore> {
    let backend: Arc<dyn BlobBackend> = match config.blobs.backend {
        BlobBackendKind::Fs => Arc::new(
            FsBlobBackend::open(&config.blobs.root)
                .await
                .with_context(|| format!("failed to open blob root {}", config.blobs.root))?,
        ),
        BlobBackendKind::Memory => Arc::new(MemoryBlobBackend::new()),
    };
    BlobStore::with_fallback_file(backend, &config.blobs.fallback_image)
        .await
        .with_context(|| {
            format!(
                "failed to load fallback image {}",
                config.blobs.fallback_image
            )
        })
}
