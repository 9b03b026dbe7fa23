//! # livepipe-repository
//!
//! Cache-backed operations over users, themes, icons, tags and livestreams,
//! and the reservation allocator that admits livestream bookings without
//! overbooking.
//!
//! ## Example
//!
//! ```ignore
//! let repo = Repository::new(store, Arc::new(CacheRegistry::new()), blobs, ReservationAllocator::default());
//!
//! let mut tx = repo.begin().await?;
//! match repo.reserve_livestream(&mut tx, user_id, request).await? {
//!     ReserveOutcome::Reserved(view) => {
//!         tx.commit().await?;
//!         Ok(Some(view))
//!     }
//!     ReserveOutcome::CapacityExceeded => {
//!         tx.rollback().await?;
//!         Ok(None)
//!     }
//! }
//! ```

pub mod allocator;
mod error;
mod repository;
mod views;

pub use allocator::{
    Admission, DEFAULT_SLOT_SECONDS, DEFAULT_TERM_END, DEFAULT_TERM_START, ReservationAllocator,
    ReservationRequest, ReserveOutcome, provision_slots, slot_grid,
};
pub use error::{CoreError, ErrorKind, Result};
pub use repository::{RESERVED_USER_NAMES, Repository};
pub use views::{
    LivestreamQuery, LivestreamView, ProfileUpdate, ReserveLivestream, ThemeView, UserView,
};
