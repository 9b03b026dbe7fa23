use bytes::Bytes;
use tracing::{info, instrument, warn};

use livepipe_blob::Blob;
use livepipe_cache::{CacheKey, InvalidatingTransaction, Mutation};
use livepipe_storage::{
    IconRecord, NewUser, StorageError, StoreTransaction, ThemeRecord, UserRecord,
};

use super::{RESERVED_USER_NAMES, Repository, read_through};
use crate::error::{CoreError, Result};
use crate::views::{ProfileUpdate, ThemeView, UserView};

impl Repository {
    pub async fn user_by_id(
        &self,
        tx: &mut InvalidatingTransaction,
        user_id: i64,
    ) -> Result<Option<UserRecord>> {
        let bypass = tx.touches(&CacheKey::User(user_id));
        read_through(bypass, &self.caches.users, user_id, tx.user_by_id(user_id)).await
    }

    pub async fn user_id_by_name(
        &self,
        tx: &mut InvalidatingTransaction,
        name: &str,
    ) -> Result<Option<i64>> {
        let bypass = tx.touches(&CacheKey::UserIdByName(name.to_string()));
        let loader = async {
            let user = tx.user_by_name(name).await?;
            Ok::<_, StorageError>(user.map(|user| user.id))
        };
        read_through(
            bypass,
            &self.caches.user_ids_by_name,
            name.to_string(),
            loader,
        )
        .await
    }

    /// Resolves `name` through the name→id and id→user caches.
    ///
    /// A name entry that points at a missing user, or at a user that now
    /// has another name, is treated as a miss: both entries are dropped and
    /// the lookup runs once more.
    pub async fn user_by_name(
        &self,
        tx: &mut InvalidatingTransaction,
        name: &str,
    ) -> Result<Option<UserRecord>> {
        match self.resolve_user_by_name(tx, name).await {
            Err(CoreError::InconsistentCacheState { cache, key }) => {
                warn!(cache, key = %key, "stale name entry, retrying lookup");
                self.resolve_user_by_name(tx, name).await
            }
            other => other,
        }
    }

    async fn resolve_user_by_name(
        &self,
        tx: &mut InvalidatingTransaction,
        name: &str,
    ) -> Result<Option<UserRecord>> {
        let Some(user_id) = self.user_id_by_name(tx, name).await? else {
            return Ok(None);
        };
        match self.user_by_id(tx, user_id).await? {
            Some(user) if user.name == name => Ok(Some(user)),
            _ => {
                self.caches.user_ids_by_name.invalidate(&name.to_string());
                self.caches.users.invalidate(&user_id);
                Err(CoreError::InconsistentCacheState {
                    cache: "user_ids_by_name",
                    key: name.to_string(),
                })
            }
        }
    }

    pub async fn theme_by_user_id(
        &self,
        tx: &mut InvalidatingTransaction,
        user_id: i64,
    ) -> Result<Option<ThemeRecord>> {
        let bypass = tx.touches(&CacheKey::Theme(user_id));
        read_through(
            bypass,
            &self.caches.themes,
            user_id,
            tx.theme_by_user_id(user_id),
        )
        .await
    }

    /// The theme of the user called `name`.
    pub async fn theme_of_user_named(
        &self,
        tx: &mut InvalidatingTransaction,
        name: &str,
    ) -> Result<ThemeRecord> {
        let user_id = self
            .user_id_by_name(tx, name)
            .await?
            .ok_or_else(|| CoreError::not_found("user", name))?;
        self.theme_by_user_id(tx, user_id)
            .await?
            .ok_or_else(|| CoreError::not_found("theme", user_id))
    }

    /// The digest of the user's icon, or the fallback digest if the user
    /// has none.
    pub async fn icon_digest_by_user_id(
        &self,
        tx: &mut InvalidatingTransaction,
        user_id: i64,
    ) -> Result<String> {
        let bypass = tx.touches(&CacheKey::IconDigest(user_id));
        let digest = read_through(
            bypass,
            &self.caches.icon_digests,
            user_id,
            tx.icon_digest_by_user_id(user_id),
        )
        .await?;
        Ok(digest.unwrap_or_else(|| self.blobs.fallback_id().to_string()))
    }

    /// The user with theme and icon digest.
    pub async fn fill_user(
        &self,
        tx: &mut InvalidatingTransaction,
        user_id: i64,
    ) -> Result<UserView> {
        let user = self
            .user_by_id(tx, user_id)
            .await?
            .ok_or_else(|| CoreError::not_found("user", user_id))?;
        let theme = self
            .theme_by_user_id(tx, user_id)
            .await?
            .ok_or_else(|| CoreError::not_found("theme", user_id))?;
        let icon_hash = self.icon_digest_by_user_id(tx, user_id).await?;
        Ok(UserView::compose(
            user,
            ThemeView {
                id: theme.id,
                dark_mode: theme.dark_mode,
            },
            icon_hash,
        ))
    }

    /// Creates a user and its theme.
    #[instrument(skip(self, tx, user), fields(name = %user.name))]
    pub async fn register_user(
        &self,
        tx: &mut InvalidatingTransaction,
        user: NewUser,
        dark_mode: bool,
    ) -> Result<UserView> {
        check_user_name(&user.name)?;

        let user = tx.insert_user(&user).await?;
        let theme = tx.insert_theme(user.id, dark_mode).await?;
        tx.record(Mutation::UserRegistered {
            user_id: user.id,
            name: user.name.clone(),
        });
        info!(user_id = user.id, "user registered");

        let theme = ThemeView {
            id: theme.id,
            dark_mode: theme.dark_mode,
        };
        let icon_hash = self.blobs.fallback_id().to_string();
        Ok(UserView::compose(user, theme, icon_hash))
    }

    /// Applies `update` to the user's profile and returns the new row.
    #[instrument(skip(self, tx, update))]
    pub async fn update_user_profile(
        &self,
        tx: &mut InvalidatingTransaction,
        user_id: i64,
        update: ProfileUpdate,
    ) -> Result<UserRecord> {
        let current = tx
            .user_by_id(user_id)
            .await?
            .ok_or_else(|| CoreError::not_found("user", user_id))?;

        let mut updated = current.clone();
        if let Some(name) = update.name {
            check_user_name(&name)?;
            updated.name = name;
        }
        if let Some(display_name) = update.display_name {
            updated.display_name = display_name;
        }
        if let Some(description) = update.description {
            updated.description = description;
        }
        if updated == current {
            return Ok(current);
        }

        tx.update_user(&updated).await?;
        tx.record(Mutation::UserProfileUpdated {
            user_id,
            old_name: current.name,
            new_name: updated.name.clone(),
        });
        Ok(updated)
    }

    pub async fn set_dark_mode(
        &self,
        tx: &mut InvalidatingTransaction,
        user_id: i64,
        dark_mode: bool,
    ) -> Result<ThemeRecord> {
        let theme = tx.update_theme(user_id, dark_mode).await?;
        tx.record(Mutation::ThemeUpdated { user_id });
        Ok(theme)
    }

    /// Stores `image` and makes it the user's icon.
    ///
    /// The blob is written before the transaction commits. If it rolls back
    /// the blob stays behind unreferenced.
    #[instrument(skip(self, tx, image), fields(size = image.len()))]
    pub async fn replace_icon(
        &self,
        tx: &mut InvalidatingTransaction,
        user_id: i64,
        image: Bytes,
    ) -> Result<IconRecord> {
        let digest = self.blobs.put(image).await?;
        let icon = tx.replace_icon(user_id, digest.as_str()).await?;
        tx.record(Mutation::IconReplaced { user_id });
        info!(icon_id = icon.id, digest = %digest, "icon replaced");
        Ok(icon)
    }

    /// The icon image of the user called `name`, or the fallback image.
    pub async fn icon_image(&self, tx: &mut InvalidatingTransaction, name: &str) -> Result<Blob> {
        let user_id = self
            .user_id_by_name(tx, name)
            .await?
            .ok_or_else(|| CoreError::not_found("user", name))?;
        let digest = self.icon_digest_by_user_id(tx, user_id).await?;
        Ok(self.blobs.get_by_digest(&digest).await)
    }
}

fn check_user_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CoreError::invalid_request("user name must not be empty"));
    }
    if RESERVED_USER_NAMES.contains(&name) {
        return Err(CoreError::invalid_request(format!(
            "the user name {name:?} is reserved"
        )));
    }
    Ok(())
}
