//! Transactions that invalidate caches after they commit.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use livepipe_storage::{
    DynEntityStore, IconRecord, LivestreamRecord, NewLivestream, NewReservation, NewUser,
    ReservationRecord, ReservationSlot, StorageResult, StoreTransaction, TagRecord, ThemeRecord,
    TimeWindow, UserRecord,
};

use crate::invalidation::{InvalidationSink, Mutation};
use crate::metrics;
use crate::registry::CacheKey;

/// Opens transactions whose recorded mutations invalidate caches on commit.
#[derive(Clone)]
pub struct InvalidationCoordinator {
    store: DynEntityStore,
    sink: Arc<dyn InvalidationSink>,
}

impl InvalidationCoordinator {
    pub fn new(store: DynEntityStore, sink: Arc<dyn InvalidationSink>) -> Self {
        Self { store, sink }
    }

    pub fn store(&self) -> &DynEntityStore {
        &self.store
    }

    pub async fn begin(&self) -> StorageResult<InvalidatingTransaction> {
        let inner = self.store.begin().await?;
        Ok(InvalidatingTransaction::new(inner, Arc::clone(&self.sink)))
    }
}

impl std::fmt::Debug for InvalidationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationCoordinator")
            .field("backend", &self.store.backend_name())
            .finish()
    }
}

/// A store transaction wrapper that collects mutations and invalidates the
/// keys they affect once the transaction has committed.
///
/// Nothing is invalidated on rollback or when the transaction is dropped.
/// Invalidation failures are logged and do not fail the commit.
pub struct InvalidatingTransaction {
    inner: Box<dyn StoreTransaction>,
    sink: Arc<dyn InvalidationSink>,
    pending: Vec<Mutation>,
}

impl InvalidatingTransaction {
    pub fn new(inner: Box<dyn StoreTransaction>, sink: Arc<dyn InvalidationSink>) -> Self {
        Self {
            inner,
            sink,
            pending: Vec::new(),
        }
    }

    /// Queues a mutation to invalidate on commit.
    pub fn record(&mut self, mutation: Mutation) {
        self.pending.push(mutation);
    }

    /// Whether a recorded mutation will invalidate `key` on commit.
    ///
    /// Reads of such keys must bypass the cache: the transaction sees its
    /// own uncommitted writes, which must never be cached.
    pub fn touches(&self, key: &CacheKey) -> bool {
        self.pending
            .iter()
            .any(|mutation| mutation.affected_keys().contains(key))
    }

    /// Commits the inner transaction, then invalidates every affected key.
    pub async fn commit(self) -> StorageResult<()> {
        let InvalidatingTransaction {
            inner,
            sink,
            pending,
        } = self;

        inner.commit().await?;

        let mut seen = HashSet::new();
        let keys: Vec<CacheKey> = pending
            .iter()
            .flat_map(Mutation::affected_keys)
            .filter(|key| seen.insert(key.clone()))
            .collect();

        for key in &keys {
            if let Err(err) = sink.invalidate(key).await {
                metrics::record_invalidation_failure(key.kind().name());
                warn!(key = %key, error = %err, "cache invalidation failed after commit");
            }
        }
        debug!(
            mutations = pending.len(),
            keys = keys.len(),
            "invalidated caches after commit"
        );

        Ok(())
    }

    /// Rolls back the inner transaction and discards recorded mutations.
    pub async fn rollback(self) -> StorageResult<()> {
        if !self.pending.is_empty() {
            debug!(
                mutations = self.pending.len(),
                "discarding invalidations of rolled back transaction"
            );
        }
        self.inner.rollback().await
    }
}

impl std::fmt::Debug for InvalidatingTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidatingTransaction")
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[async_trait]
impl StoreTransaction for InvalidatingTransaction {
    async fn commit(self: Box<Self>) -> StorageResult<()> {
        InvalidatingTransaction::commit(*self).await
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        InvalidatingTransaction::rollback(*self).await
    }

    async fn user_by_id(&mut self, id: i64) -> StorageResult<Option<UserRecord>> {
        self.inner.user_by_id(id).await
    }

    async fn user_by_name(&mut self, name: &str) -> StorageResult<Option<UserRecord>> {
        self.inner.user_by_name(name).await
    }

    async fn insert_user(&mut self, user: &NewUser) -> StorageResult<UserRecord> {
        self.inner.insert_user(user).await
    }

    async fn update_user(&mut self, user: &UserRecord) -> StorageResult<()> {
        self.inner.update_user(user).await
    }

    async fn theme_by_user_id(&mut self, user_id: i64) -> StorageResult<Option<ThemeRecord>> {
        self.inner.theme_by_user_id(user_id).await
    }

    async fn insert_theme(&mut self, user_id: i64, dark_mode: bool) -> StorageResult<ThemeRecord> {
        self.inner.insert_theme(user_id, dark_mode).await
    }

    async fn update_theme(&mut self, user_id: i64, dark_mode: bool) -> StorageResult<ThemeRecord> {
        self.inner.update_theme(user_id, dark_mode).await
    }

    async fn icon_digest_by_user_id(&mut self, user_id: i64) -> StorageResult<Option<String>> {
        self.inner.icon_digest_by_user_id(user_id).await
    }

    async fn replace_icon(
        &mut self,
        user_id: i64,
        image_digest: &str,
    ) -> StorageResult<IconRecord> {
        self.inner.replace_icon(user_id, image_digest).await
    }

    async fn livestream_by_id(&mut self, id: i64) -> StorageResult<Option<LivestreamRecord>> {
        self.inner.livestream_by_id(id).await
    }

    async fn livestream_ids_by_user_id(&mut self, user_id: i64) -> StorageResult<Vec<i64>> {
        self.inner.livestream_ids_by_user_id(user_id).await
    }

    async fn list_livestreams(
        &mut self,
        limit: Option<u32>,
    ) -> StorageResult<Vec<LivestreamRecord>> {
        self.inner.list_livestreams(limit).await
    }

    async fn insert_livestream(
        &mut self,
        livestream: &NewLivestream,
    ) -> StorageResult<LivestreamRecord> {
        self.inner.insert_livestream(livestream).await
    }

    async fn all_tags(&mut self) -> StorageResult<Vec<TagRecord>> {
        self.inner.all_tags().await
    }

    async fn insert_tag(&mut self, name: &str) -> StorageResult<TagRecord> {
        self.inner.insert_tag(name).await
    }

    async fn tag_ids_by_livestream_id(&mut self, livestream_id: i64) -> StorageResult<Vec<i64>> {
        self.inner.tag_ids_by_livestream_id(livestream_id).await
    }

    async fn livestream_ids_by_tag_id(&mut self, tag_id: i64) -> StorageResult<Vec<i64>> {
        self.inner.livestream_ids_by_tag_id(tag_id).await
    }

    async fn attach_tag(&mut self, livestream_id: i64, tag_id: i64) -> StorageResult<i64> {
        self.inner.attach_tag(livestream_id, tag_id).await
    }

    async fn lock_slots(&mut self, window: TimeWindow) -> StorageResult<Vec<ReservationSlot>> {
        self.inner.lock_slots(window).await
    }

    async fn decrement_slots(&mut self, slot_ids: &[i64]) -> StorageResult<()> {
        self.inner.decrement_slots(slot_ids).await
    }

    async fn slots_in(&mut self, window: TimeWindow) -> StorageResult<Vec<ReservationSlot>> {
        self.inner.slots_in(window).await
    }

    async fn insert_slots(&mut self, windows: &[TimeWindow], capacity: i64) -> StorageResult<u64> {
        self.inner.insert_slots(windows, capacity).await
    }

    async fn slot_count(&mut self) -> StorageResult<i64> {
        self.inner.slot_count().await
    }

    async fn insert_reservation(
        &mut self,
        reservation: &NewReservation,
    ) -> StorageResult<ReservationRecord> {
        self.inner.insert_reservation(reservation).await
    }

    async fn count_reservations_in(&mut self, window: TimeWindow) -> StorageResult<i64> {
        self.inner.count_reservations_in(window).await
    }
}
