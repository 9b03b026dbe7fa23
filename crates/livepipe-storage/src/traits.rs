//! Entity store traits.

use async_trait::async_trait;

use crate::StorageResult;
use crate::types::{
    IconRecord, LivestreamRecord, NewLivestream, NewReservation, NewUser, ReservationRecord,
    ReservationSlot, TagRecord, ThemeRecord, TimeWindow, UserRecord,
};

/// The durable source of truth.
///
/// All reads and writes go through a [`StoreTransaction`] obtained from
/// [`EntityStore::begin`], so callers control atomicity and row locking.
///
/// # Example
///
/// ```ignore
/// async fn rename(store: &dyn EntityStore, id: i64) -> StorageResult<()> {
///     let mut tx = store.begin().await?;
///     if let Some(mut user) = tx.user_by_id(id).await? {
///         user.display_name = "Renamed".into();
///         tx.update_user(&user).await?;
///     }
///     tx.commit().await
/// }
/// ```
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Begins a new transaction.
    async fn begin(&self) -> StorageResult<Box<dyn StoreTransaction>>;

    /// Returns the name of this backend for logging.
    fn backend_name(&self) -> &'static str;
}

/// A unit of work against the entity store.
///
/// Dropping a transaction without calling [`commit`](Self::commit) rolls it
/// back. Row locks taken with [`lock_slots`](Self::lock_slots) are held until
/// the transaction ends.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Commits all changes made in this transaction.
    async fn commit(self: Box<Self>) -> StorageResult<()>;

    /// Discards all changes made in this transaction.
    async fn rollback(self: Box<Self>) -> StorageResult<()>;

    // Users

    async fn user_by_id(&mut self, id: i64) -> StorageResult<Option<UserRecord>>;

    async fn user_by_name(&mut self, name: &str) -> StorageResult<Option<UserRecord>>;

    /// Inserts a user. Fails with `AlreadyExists` if the name is taken.
    async fn insert_user(&mut self, user: &NewUser) -> StorageResult<UserRecord>;

    /// Overwrites the mutable fields of an existing user, including its name.
    async fn update_user(&mut self, user: &UserRecord) -> StorageResult<()>;

    // Themes

    async fn theme_by_user_id(&mut self, user_id: i64) -> StorageResult<Option<ThemeRecord>>;

    /// Inserts the theme for a user. Fails with `AlreadyExists` if one exists.
    async fn insert_theme(&mut self, user_id: i64, dark_mode: bool) -> StorageResult<ThemeRecord>;

    async fn update_theme(&mut self, user_id: i64, dark_mode: bool) -> StorageResult<ThemeRecord>;

    // Icons

    async fn icon_digest_by_user_id(&mut self, user_id: i64) -> StorageResult<Option<String>>;

    /// Removes any existing icon for the user and inserts a new one.
    async fn replace_icon(&mut self, user_id: i64, image_digest: &str)
    -> StorageResult<IconRecord>;

    // Livestreams

    async fn livestream_by_id(&mut self, id: i64) -> StorageResult<Option<LivestreamRecord>>;

    /// Ids of livestreams owned by a user, ascending.
    async fn livestream_ids_by_user_id(&mut self, user_id: i64) -> StorageResult<Vec<i64>>;

    /// All livestreams, newest first.
    async fn list_livestreams(&mut self, limit: Option<u32>)
    -> StorageResult<Vec<LivestreamRecord>>;

    async fn insert_livestream(
        &mut self,
        livestream: &NewLivestream,
    ) -> StorageResult<LivestreamRecord>;

    // Tags

    /// Every tag, ascending by id.
    async fn all_tags(&mut self) -> StorageResult<Vec<TagRecord>>;

    /// Inserts a tag. Fails with `AlreadyExists` if the name is taken.
    async fn insert_tag(&mut self, name: &str) -> StorageResult<TagRecord>;

    /// Tag ids attached to a livestream, in attachment order.
    async fn tag_ids_by_livestream_id(&mut self, livestream_id: i64) -> StorageResult<Vec<i64>>;

    /// Livestream ids carrying a tag, newest first.
    async fn livestream_ids_by_tag_id(&mut self, tag_id: i64) -> StorageResult<Vec<i64>>;

    /// Links a tag to a livestream and returns the link id.
    async fn attach_tag(&mut self, livestream_id: i64, tag_id: i64) -> StorageResult<i64>;

    // Reservation slots

    /// Locks every slot intersecting `window` exclusively until the
    /// transaction ends, acquiring locks in ascending `start_at` order.
    ///
    /// Returns the locked slots in that order.
    async fn lock_slots(&mut self, window: TimeWindow) -> StorageResult<Vec<ReservationSlot>>;

    /// Decrements the remaining counter of each slot by one.
    ///
    /// Fails with `Constraint` and changes nothing if any counter would drop
    /// below zero. Callers must hold the slot locks.
    async fn decrement_slots(&mut self, slot_ids: &[i64]) -> StorageResult<()>;

    /// Reads slots intersecting `window` without locking them.
    async fn slots_in(&mut self, window: TimeWindow) -> StorageResult<Vec<ReservationSlot>>;

    /// Inserts one full slot per window. Returns the number of slots created.
    async fn insert_slots(&mut self, windows: &[TimeWindow], capacity: i64) -> StorageResult<u64>;

    async fn slot_count(&mut self) -> StorageResult<i64>;

    async fn insert_reservation(
        &mut self,
        reservation: &NewReservation,
    ) -> StorageResult<ReservationRecord>;

    /// Number of reservations intersecting `window`.
    async fn count_reservations_in(&mut self, window: TimeWindow) -> StorageResult<i64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time check that the traits are object-safe.
    fn _assert_entity_store_object_safe(_: &dyn EntityStore) {}
    fn _assert_store_transaction_object_safe(_: &dyn StoreTransaction) {}
}
