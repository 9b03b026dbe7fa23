//! PostgreSQL transaction implementation.

use async_trait::async_trait;
use sqlx_postgres::PgTransaction;

use livepipe_storage::{
    IconRecord, LivestreamRecord, NewLivestream, NewReservation, NewUser, ReservationRecord,
    ReservationSlot, StorageError, StorageResult, StoreTransaction, TagRecord, ThemeRecord,
    TimeWindow, UserRecord,
};

use crate::queries::{livestreams, reservations, users};

/// Wraps an sqlx transaction. Rolls back on drop if not explicitly committed.
pub struct PostgresTransaction {
    /// Taken on commit or rollback.
    tx: Option<PgTransaction<'static>>,
}

impl PostgresTransaction {
    pub fn new(tx: PgTransaction<'static>) -> Self {
        Self { tx: Some(tx) }
    }

    fn conn(&mut self) -> StorageResult<&mut PgTransaction<'static>> {
        self.tx.as_mut().ok_or_else(|| {
            StorageError::transaction_error(
                "Transaction already completed (committed or rolled back)",
            )
        })
    }
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let mut this = self;
        if let Some(tx) = this.tx.take() {
            tx.commit().await.map_err(|e| {
                StorageError::transaction_error(format!("Failed to commit transaction: {e}"))
            })?;
            tracing::debug!("Transaction committed successfully");
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        let mut this = self;
        if let Some(tx) = this.tx.take() {
            tx.rollback().await.map_err(|e| {
                StorageError::transaction_error(format!("Failed to rollback transaction: {e}"))
            })?;
            tracing::debug!("Transaction rolled back successfully");
        }
        Ok(())
    }

    async fn user_by_id(&mut self, id: i64) -> StorageResult<Option<UserRecord>> {
        users::user_by_id(self.conn()?, id).await
    }

    async fn user_by_name(&mut self, name: &str) -> StorageResult<Option<UserRecord>> {
        users::user_by_name(self.conn()?, name).await
    }

    async fn insert_user(&mut self, user: &NewUser) -> StorageResult<UserRecord> {
        users::insert_user(self.conn()?, user).await
    }

    async fn update_user(&mut self, user: &UserRecord) -> StorageResult<()> {
        users::update_user(self.conn()?, user).await
    }

    async fn theme_by_user_id(&mut self, user_id: i64) -> StorageResult<Option<ThemeRecord>> {
        users::theme_by_user_id(self.conn()?, user_id).await
    }

    async fn insert_theme(&mut self, user_id: i64, dark_mode: bool) -> StorageResult<ThemeRecord> {
        users::insert_theme(self.conn()?, user_id, dark_mode).await
    }

    async fn update_theme(&mut self, user_id: i64, dark_mode: bool) -> StorageResult<ThemeRecord> {
        users::update_theme(self.conn()?, user_id, dark_mode).await
    }

    async fn icon_digest_by_user_id(&mut self, user_id: i64) -> StorageResult<Option<String>> {
        users::icon_digest_by_user_id(self.conn()?, user_id).await
    }

    async fn replace_icon(
        &mut self,
        user_id: i64,
        image_digest: &str,
    ) -> StorageResult<IconRecord> {
        users::replace_icon(self.conn()?, user_id, image_digest).await
    }

    async fn livestream_by_id(&mut self, id: i64) -> StorageResult<Option<LivestreamRecord>> {
        livestreams::livestream_by_id(self.conn()?, id).await
    }

    async fn livestream_ids_by_user_id(&mut self, user_id: i64) -> StorageResult<Vec<i64>> {
        livestreams::livestream_ids_by_user_id(self.conn()?, user_id).await
    }

    async fn list_livestreams(
        &mut self,
        limit: Option<u32>,
    ) -> StorageResult<Vec<LivestreamRecord>> {
        livestreams::list_livestreams(self.conn()?, limit).await
    }

    async fn insert_livestream(
        &mut self,
        livestream: &NewLivestream,
    ) -> StorageResult<LivestreamRecord> {
        livestreams::insert_livestream(self.conn()?, livestream).await
    }

    async fn all_tags(&mut self) -> StorageResult<Vec<TagRecord>> {
        livestreams::all_tags(self.conn()?).await
    }

    async fn insert_tag(&mut self, name: &str) -> StorageResult<TagRecord> {
        livestreams::insert_tag(self.conn()?, name).await
    }

    async fn tag_ids_by_livestream_id(&mut self, livestream_id: i64) -> StorageResult<Vec<i64>> {
        livestreams::tag_ids_by_livestream_id(self.conn()?, livestream_id).await
    }

    async fn livestream_ids_by_tag_id(&mut self, tag_id: i64) -> StorageResult<Vec<i64>> {
        livestreams::livestream_ids_by_tag_id(self.conn()?, tag_id).await
    }

    async fn attach_tag(&mut self, livestream_id: i64, tag_id: i64) -> StorageResult<i64> {
        livestreams::attach_tag(self.conn()?, livestream_id, tag_id).await
    }

    async fn lock_slots(&mut self, window: TimeWindow) -> StorageResult<Vec<ReservationSlot>> {
        reservations::lock_slots(self.conn()?, window).await
    }

    async fn decrement_slots(&mut self, slot_ids: &[i64]) -> StorageResult<()> {
        reservations::decrement_slots(self.conn()?, slot_ids).await
    }

    async fn slots_in(&mut self, window: TimeWindow) -> StorageResult<Vec<ReservationSlot>> {
        reservations::slots_in(self.conn()?, window).await
    }

    async fn insert_slots(&mut self, windows: &[TimeWindow], capacity: i64) -> StorageResult<u64> {
        reservations::insert_slots(self.conn()?, windows, capacity).await
    }

    async fn slot_count(&mut self) -> StorageResult<i64> {
        reservations::slot_count(self.conn()?).await
    }

    async fn insert_reservation(
        &mut self,
        reservation: &NewReservation,
    ) -> StorageResult<ReservationRecord> {
        reservations::insert_reservation(self.conn()?, reservation).await
    }

    async fn count_reservations_in(&mut self, window: TimeWindow) -> StorageResult<i64> {
        reservations::count_reservations_in(self.conn()?, window).await
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if self.tx.is_some() {
            // sqlx issues the ROLLBACK when the inner transaction drops.
            tracing::warn!(
                "PostgresTransaction dropped without explicit commit/rollback - will auto-rollback"
            );
        }
    }
}
