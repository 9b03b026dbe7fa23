use std::sync::Arc;

use tracing::info;

use livepipe_cache::{AllTags, CacheKey, InvalidatingTransaction, Mutation, TagCatalog};
use livepipe_storage::{StorageError, StoreTransaction, TagRecord};

use super::{Repository, read_through};
use crate::error::{CoreError, Result};

impl Repository {
    /// Every tag, indexed by id and name.
    pub async fn tag_catalog(&self, tx: &mut InvalidatingTransaction) -> Result<Arc<TagCatalog>> {
        let bypass = tx.touches(&CacheKey::TagCatalog);
        let loader = async {
            let tags = tx.all_tags().await?;
            Ok::<_, StorageError>(Some(Arc::new(TagCatalog::new(tags))))
        };
        read_through(bypass, &self.caches.tag_catalog, AllTags, loader)
            .await?
            .ok_or_else(|| CoreError::not_found("tag catalog", "all"))
    }

    pub async fn tag_by_id(
        &self,
        tx: &mut InvalidatingTransaction,
        tag_id: i64,
    ) -> Result<Option<TagRecord>> {
        Ok(self.tag_catalog(tx).await?.by_id(tag_id).cloned())
    }

    /// Tags named `name`. Names are unique, so this holds at most one tag.
    pub async fn tags_by_name(
        &self,
        tx: &mut InvalidatingTransaction,
        name: &str,
    ) -> Result<Vec<TagRecord>> {
        Ok(self
            .tag_catalog(tx)
            .await?
            .by_name(name)
            .cloned()
            .into_iter()
            .collect())
    }

    pub async fn create_tag(
        &self,
        tx: &mut InvalidatingTransaction,
        name: &str,
    ) -> Result<TagRecord> {
        if name.is_empty() {
            return Err(CoreError::invalid_request("tag name must not be empty"));
        }
        let tag = tx.insert_tag(name).await?;
        tx.record(Mutation::TagCreated { tag_id: tag.id });
        info!(tag_id = tag.id, name, "tag created");
        Ok(tag)
    }
}
