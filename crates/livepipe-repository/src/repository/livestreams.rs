use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use livepipe_cache::{CacheKey, InvalidatingTransaction, Mutation, TagCatalog};
use livepipe_storage::{
    LivestreamRecord, NewLivestream, StorageError, StoreTransaction, TagRecord,
};

use super::{Repository, read_through};
use crate::allocator::{ReservationRequest, ReserveOutcome};
use crate::error::{CoreError, Result};
use crate::views::{LivestreamQuery, LivestreamView, ReserveLivestream};

impl Repository {
    pub async fn livestream_by_id(
        &self,
        tx: &mut InvalidatingTransaction,
        livestream_id: i64,
    ) -> Result<Option<LivestreamRecord>> {
        let bypass = tx.touches(&CacheKey::Livestream(livestream_id));
        read_through(
            bypass,
            &self.caches.livestreams,
            livestream_id,
            tx.livestream_by_id(livestream_id),
        )
        .await
    }

    /// Ids of the user's livestreams, oldest first.
    pub async fn livestream_ids_by_user_id(
        &self,
        tx: &mut InvalidatingTransaction,
        user_id: i64,
    ) -> Result<Arc<[i64]>> {
        let bypass = tx.touches(&CacheKey::LivestreamIdsByUser(user_id));
        let loader = async {
            let ids = tx.livestream_ids_by_user_id(user_id).await?;
            Ok::<_, StorageError>(Some(Arc::<[i64]>::from(ids)))
        };
        let ids = read_through(
            bypass,
            &self.caches.livestream_ids_by_user,
            user_id,
            loader,
        )
        .await?;
        Ok(ids.unwrap_or_else(empty_ids))
    }

    pub async fn tag_ids_by_livestream_id(
        &self,
        tx: &mut InvalidatingTransaction,
        livestream_id: i64,
    ) -> Result<Arc<[i64]>> {
        let bypass = tx.touches(&CacheKey::TagIdsByLivestream(livestream_id));
        let loader = async {
            let ids = tx.tag_ids_by_livestream_id(livestream_id).await?;
            Ok::<_, StorageError>(Some(Arc::<[i64]>::from(ids)))
        };
        let ids = read_through(
            bypass,
            &self.caches.tag_ids_by_livestream,
            livestream_id,
            loader,
        )
        .await?;
        Ok(ids.unwrap_or_else(empty_ids))
    }

    /// Ids of livestreams carrying the tag, newest first.
    pub async fn livestream_ids_by_tag_id(
        &self,
        tx: &mut InvalidatingTransaction,
        tag_id: i64,
    ) -> Result<Arc<[i64]>> {
        let bypass = tx.touches(&CacheKey::LivestreamIdsByTag(tag_id));
        let loader = async {
            let ids = tx.livestream_ids_by_tag_id(tag_id).await?;
            Ok::<_, StorageError>(Some(Arc::<[i64]>::from(ids)))
        };
        let ids =
            read_through(bypass, &self.caches.livestream_ids_by_tag, tag_id, loader).await?;
        Ok(ids.unwrap_or_else(empty_ids))
    }

    /// The tags attached to a livestream.
    pub async fn tags_of_livestream(
        &self,
        tx: &mut InvalidatingTransaction,
        livestream_id: i64,
    ) -> Result<Vec<TagRecord>> {
        let tag_ids = self.tag_ids_by_livestream_id(tx, livestream_id).await?;
        self.tags_for_ids(tx, &tag_ids).await
    }

    /// Looks up tag ids in the catalog. When the cached catalog lacks one of
    /// the ids, the tags are read again inside `tx` without touching the
    /// shared entry; ids still unknown after that are skipped.
    async fn tags_for_ids(
        &self,
        tx: &mut InvalidatingTransaction,
        tag_ids: &[i64],
    ) -> Result<Vec<TagRecord>> {
        let mut catalog = self.tag_catalog(tx).await?;
        if tag_ids.iter().any(|&id| catalog.by_id(id).is_none()) {
            debug!("tag catalog is missing tags, reading them from the store");
            catalog = Arc::new(TagCatalog::new(tx.all_tags().await?));
        }

        let mut tags = Vec::with_capacity(tag_ids.len());
        for &id in tag_ids {
            match catalog.by_id(id) {
                Some(tag) => tags.push(tag.clone()),
                None => warn!(tag_id = id, "attached tag does not exist"),
            }
        }
        Ok(tags)
    }

    /// The livestream with its owner view and tags.
    pub async fn fill_livestream(
        &self,
        tx: &mut InvalidatingTransaction,
        record: LivestreamRecord,
    ) -> Result<LivestreamView> {
        let owner = self.fill_user(tx, record.user_id).await?;
        let tags = self.tags_of_livestream(tx, record.id).await?;
        Ok(LivestreamView::compose(record, owner, tags))
    }

    pub async fn livestream_view(
        &self,
        tx: &mut InvalidatingTransaction,
        livestream_id: i64,
    ) -> Result<LivestreamView> {
        let record = self
            .livestream_by_id(tx, livestream_id)
            .await?
            .ok_or_else(|| CoreError::not_found("livestream", livestream_id))?;
        self.fill_livestream(tx, record).await
    }

    async fn fill_livestream_ids(
        &self,
        tx: &mut InvalidatingTransaction,
        ids: &[i64],
    ) -> Result<Vec<LivestreamView>> {
        let mut views = Vec::with_capacity(ids.len());
        for &id in ids {
            views.push(self.livestream_view(tx, id).await?);
        }
        Ok(views)
    }

    /// Livestreams matching `query`, newest first.
    #[instrument(skip(self, tx))]
    pub async fn search_livestreams(
        &self,
        tx: &mut InvalidatingTransaction,
        query: LivestreamQuery,
    ) -> Result<Vec<LivestreamView>> {
        match query {
            LivestreamQuery::ByTag(name) => {
                let mut ids = Vec::new();
                for tag in self.tags_by_name(tx, &name).await? {
                    ids.extend_from_slice(&self.livestream_ids_by_tag_id(tx, tag.id).await?);
                }
                ids.sort_unstable_by(|a, b| b.cmp(a));
                ids.dedup();
                self.fill_livestream_ids(tx, &ids).await
            }
            LivestreamQuery::All { limit } => {
                let records = tx.list_livestreams(limit).await?;
                let mut views = Vec::with_capacity(records.len());
                for record in records {
                    views.push(self.fill_livestream(tx, record).await?);
                }
                Ok(views)
            }
        }
    }

    /// The user's livestreams, oldest first.
    pub async fn user_livestreams(
        &self,
        tx: &mut InvalidatingTransaction,
        user_id: i64,
    ) -> Result<Vec<LivestreamView>> {
        let ids = self.livestream_ids_by_user_id(tx, user_id).await?;
        self.fill_livestream_ids(tx, &ids).await
    }

    pub async fn livestreams_of_user_named(
        &self,
        tx: &mut InvalidatingTransaction,
        name: &str,
    ) -> Result<Vec<LivestreamView>> {
        let user_id = self
            .user_id_by_name(tx, name)
            .await?
            .ok_or_else(|| CoreError::not_found("user", name))?;
        self.user_livestreams(tx, user_id).await
    }

    /// Books the requested window and creates the livestream with its tags.
    ///
    /// On [`ReserveOutcome::CapacityExceeded`] nothing was written and the
    /// caller should roll back. The returned view is built from the rows in
    /// hand, so no cache sees the new livestream before commit.
    #[instrument(skip(self, tx, request), fields(window = %request.window()))]
    pub async fn reserve_livestream(
        &self,
        tx: &mut InvalidatingTransaction,
        owner_id: i64,
        request: ReserveLivestream,
    ) -> Result<ReserveOutcome<LivestreamView>> {
        let window = request.window();
        self.allocator.validate(window)?;

        let mut seen = HashSet::new();
        let tag_ids: Vec<i64> = request
            .tags
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();
        let tags = self.tags_for_ids(tx, &tag_ids).await?;
        if tags.len() != tag_ids.len() {
            return Err(CoreError::invalid_request("reservation names an unknown tag"));
        }
        let owner = self.fill_user(tx, owner_id).await?;

        let admission = match self
            .allocator
            .try_reserve(
                tx,
                ReservationRequest {
                    user_id: owner_id,
                    window,
                },
            )
            .await?
        {
            ReserveOutcome::Reserved(admission) => admission,
            ReserveOutcome::CapacityExceeded => return Ok(ReserveOutcome::CapacityExceeded),
        };

        let livestream = tx
            .insert_livestream(&NewLivestream {
                user_id: owner_id,
                title: request.title,
                description: request.description,
                playlist_url: request.playlist_url,
                thumbnail_url: request.thumbnail_url,
                window,
                reservation_id: Some(admission.reservation.id),
            })
            .await?;
        for &tag_id in &tag_ids {
            tx.attach_tag(livestream.id, tag_id).await?;
        }
        tx.record(Mutation::LivestreamReserved {
            livestream_id: livestream.id,
            owner_id,
            tag_ids,
        });
        info!(
            livestream_id = livestream.id,
            reservation_id = admission.reservation.id,
            "livestream reserved"
        );

        Ok(ReserveOutcome::Reserved(LivestreamView::compose(
            livestream, owner, tags,
        )))
    }
}

fn empty_ids() -> Arc<[i64]> {
    Arc::from(Vec::new())
}
