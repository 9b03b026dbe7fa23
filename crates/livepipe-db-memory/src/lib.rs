//! In-memory entity store backend for livepipe.
//!
//! Provides [`MemoryStore`], an implementation of the `EntityStore` trait
//! from `livepipe-storage` backed by ordered maps behind a
//! `parking_lot::RwLock`, with per-slot exclusive locks kept in a papaya map.
//! It is used by tests and by the service when no database is configured.
//!
//! # Example
//!
//! ```ignore
//! use livepipe_db_memory::MemoryStore;
//! use livepipe_storage::EntityStore;
//!
//! let store = MemoryStore::new();
//! let mut tx = store.begin().await?;
//! let tag = tx.insert_tag("rust").await?;
//! tx.commit().await?;
//! ```

mod store;
mod transaction;

pub use store::MemoryStore;
pub use transaction::MemoryTransaction;

/// Creates a new shareable in-memory entity store.
pub fn create_entity_store() -> livepipe_storage::DynEntityStore {
    std::sync::Arc::new(MemoryStore::new())
}
