//! Cache-backed data access.
//!
//! Every operation takes the caller's [`InvalidatingTransaction`]. Reads go
//! through the registry's read-through caches unless the transaction has
//! already recorded a mutation for the same key, in which case they read the
//! store directly so uncommitted rows never reach a cache. Mutations write
//! through the transaction and record a [`Mutation`](livepipe_cache::Mutation)
//! so the affected entries are invalidated once it commits.

mod livestreams;
mod tags;
mod users;

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use livepipe_blob::BlobStore;
use livepipe_cache::{
    CacheRegistry, InvalidatingTransaction, InvalidationCoordinator, ReadThroughCache,
};
use livepipe_storage::{DynEntityStore, StorageError};

use crate::allocator::ReservationAllocator;
use crate::error::Result;

/// Names no user may register under or rename to.
pub const RESERVED_USER_NAMES: &[&str] = &["pipe"];

/// Entry point for all reads and writes of users, themes, icons, tags and
/// livestreams.
pub struct Repository {
    coordinator: InvalidationCoordinator,
    caches: Arc<CacheRegistry>,
    blobs: Arc<BlobStore>,
    allocator: ReservationAllocator,
}

impl Repository {
    pub fn new(
        store: DynEntityStore,
        caches: Arc<CacheRegistry>,
        blobs: Arc<BlobStore>,
        allocator: ReservationAllocator,
    ) -> Self {
        let coordinator = InvalidationCoordinator::new(store, caches.clone());
        Self {
            coordinator,
            caches,
            blobs,
            allocator,
        }
    }

    /// Opens a transaction whose recorded mutations invalidate this
    /// repository's caches on commit.
    pub async fn begin(&self) -> Result<InvalidatingTransaction> {
        Ok(self.coordinator.begin().await?)
    }

    pub fn store(&self) -> &DynEntityStore {
        self.coordinator.store()
    }

    pub fn caches(&self) -> &Arc<CacheRegistry> {
        &self.caches
    }

    pub fn blobs(&self) -> &Arc<BlobStore> {
        &self.blobs
    }

    pub fn allocator(&self) -> &ReservationAllocator {
        &self.allocator
    }

    /// Drops every cached entry, including cached blobs.
    pub fn reset_caches(&self) {
        self.caches.clear_all();
        self.blobs.clear_cache();
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("coordinator", &self.coordinator)
            .field("cached_entries", &self.caches.total_entries())
            .field("allocator", &self.allocator)
            .finish()
    }
}

/// Runs `loader` through `cache`, or directly when `bypass` is set.
///
/// Callers set `bypass` from [`InvalidatingTransaction::touches`].
async fn read_through<K, V, F>(
    bypass: bool,
    cache: &ReadThroughCache<K, V>,
    cache_key: K,
    loader: F,
) -> Result<Option<V>>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
    F: Future<Output = std::result::Result<Option<V>, StorageError>>,
{
    if bypass {
        return Ok(loader.await?);
    }
    Ok(cache.fetch(cache_key, loader).await?)
}
