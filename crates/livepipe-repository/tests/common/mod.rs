#![allow(dead_code)]

use std::sync::Arc;

use bytes::Bytes;

use livepipe_blob::{BlobStore, MemoryBlobBackend};
use livepipe_cache::CacheRegistry;
use livepipe_db_memory::MemoryStore;
use livepipe_repository::{Repository, ReservationAllocator, UserView, provision_slots};
use livepipe_storage::{
    DynEntityStore, EntityStore, NewUser, ReservationSlot, StoreTransaction, TimeWindow,
};

pub const FALLBACK_IMAGE: &[u8] = b"no image";
pub const HOUR: i64 = 3600;
/// Ten hourly slots starting at zero.
pub const TERM: TimeWindow = TimeWindow::new(0, 10 * HOUR);

pub struct Fixture {
    pub memory: MemoryStore,
    pub repo: Arc<Repository>,
}

pub async fn fixture() -> Fixture {
    let memory = MemoryStore::new();
    let store: DynEntityStore = Arc::new(memory.clone());
    let blobs = BlobStore::new(
        Arc::new(MemoryBlobBackend::new()),
        Bytes::from_static(FALLBACK_IMAGE),
    )
    .await
    .unwrap();
    let repo = Repository::new(
        store,
        Arc::new(CacheRegistry::new()),
        Arc::new(blobs),
        ReservationAllocator::new(TERM),
    );
    Fixture {
        memory,
        repo: Arc::new(repo),
    }
}

/// Provisions hourly slots over [`TERM`].
pub async fn provision(repo: &Repository, capacity: i64) {
    let mut tx = repo.store().begin().await.unwrap();
    provision_slots(tx.as_mut(), TERM, HOUR, capacity)
        .await
        .unwrap();
    tx.commit().await.unwrap();
}

pub async fn slots(repo: &Repository, window: TimeWindow) -> Vec<ReservationSlot> {
    let mut tx = repo.store().begin().await.unwrap();
    let slots = tx.slots_in(window).await.unwrap();
    tx.rollback().await.unwrap();
    slots
}

pub fn new_user(name: &str) -> NewUser {
    NewUser {
        name: name.to_string(),
        display_name: name.to_uppercase(),
        description: format!("{name}'s channel"),
        credential: "$2a$04$opaque".to_string(),
    }
}

pub async fn register(repo: &Repository, name: &str) -> UserView {
    let mut tx = repo.begin().await.unwrap();
    let user = repo
        .register_user(&mut tx, new_user(name), false)
        .await
        .unwrap();
    tx.commit().await.unwrap();
    user
}
