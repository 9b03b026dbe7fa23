//! # livepipe-storage
//!
//! Entity store abstraction for livepipe.
//!
//! This crate defines the traits and row types every store backend
//! implements. Implementations live in `livepipe-db-postgres` and
//! `livepipe-db-memory`.
//!
//! ## Overview
//!
//! [`EntityStore::begin`] hands out a [`StoreTransaction`] with typed
//! queries for users, themes, icons, livestreams, tags and reservation
//! slots. Slot rows support exclusive locking through
//! [`StoreTransaction::lock_slots`].
//!
//! ## Example
//!
//! ```ignore
//! use livepipe_storage::prelude::*;
//!
//! async fn owner_name(store: &dyn EntityStore, livestream_id: i64) -> StorageResult<Option<String>> {
//!     let mut tx = store.begin().await?;
//!     let Some(livestream) = tx.livestream_by_id(livestream_id).await? else {
//!         return Ok(None);
//!     };
//!     let owner = tx.user_by_id(livestream.user_id).await?;
//!     tx.commit().await?;
//!     Ok(owner.map(|u| u.name))
//! }
//! ```

mod error;
mod traits;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use traits::{EntityStore, StoreTransaction};
pub use types::{
    IconRecord, LivestreamRecord, NewLivestream, NewReservation, NewUser, ReservationRecord,
    ReservationSlot, TagRecord, ThemeRecord, TimeWindow, UserRecord,
};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shared entity store trait object.
pub type DynEntityStore = std::sync::Arc<dyn EntityStore>;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        DynEntityStore, EntityStore, StorageError, StorageResult, StoreTransaction, TimeWindow,
    };
}
