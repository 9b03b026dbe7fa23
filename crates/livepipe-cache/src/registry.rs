//! The set of caches shared by every repository call.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use livepipe_storage::{LivestreamRecord, TagRecord, ThemeRecord, UserRecord};

use crate::error::CacheError;
use crate::invalidation::InvalidationSink;
use crate::read_through::{CacheStats, ReadThroughCache};

/// Identifies one of the caches in a [`CacheRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    User,
    UserIdByName,
    Theme,
    IconDigest,
    Livestream,
    LivestreamIdsByUser,
    TagIdsByLivestream,
    LivestreamIdsByTag,
    TagCatalog,
}

impl CacheKind {
    pub const ALL: [CacheKind; 9] = [
        CacheKind::User,
        CacheKind::UserIdByName,
        CacheKind::Theme,
        CacheKind::IconDigest,
        CacheKind::Livestream,
        CacheKind::LivestreamIdsByUser,
        CacheKind::TagIdsByLivestream,
        CacheKind::LivestreamIdsByTag,
        CacheKind::TagCatalog,
    ];

    /// The cache name used in logs and metrics.
    pub const fn name(self) -> &'static str {
        match self {
            Self::User => "users",
            Self::UserIdByName => "user_ids_by_name",
            Self::Theme => "themes",
            Self::IconDigest => "icon_digests",
            Self::Livestream => "livestreams",
            Self::LivestreamIdsByUser => "livestream_ids_by_user",
            Self::TagIdsByLivestream => "tag_ids_by_livestream",
            Self::LivestreamIdsByTag => "livestream_ids_by_tag",
            Self::TagCatalog => "tag_catalog",
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A concrete key in one of the registry's caches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    User(i64),
    UserIdByName(String),
    Theme(i64),
    IconDigest(i64),
    Livestream(i64),
    LivestreamIdsByUser(i64),
    TagIdsByLivestream(i64),
    LivestreamIdsByTag(i64),
    TagCatalog,
}

impl CacheKey {
    pub fn kind(&self) -> CacheKind {
        match self {
            Self::User(_) => CacheKind::User,
            Self::UserIdByName(_) => CacheKind::UserIdByName,
            Self::Theme(_) => CacheKind::Theme,
            Self::IconDigest(_) => CacheKind::IconDigest,
            Self::Livestream(_) => CacheKind::Livestream,
            Self::LivestreamIdsByUser(_) => CacheKind::LivestreamIdsByUser,
            Self::TagIdsByLivestream(_) => CacheKind::TagIdsByLivestream,
            Self::LivestreamIdsByTag(_) => CacheKind::LivestreamIdsByTag,
            Self::TagCatalog => CacheKind::TagCatalog,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id)
            | Self::Theme(id)
            | Self::IconDigest(id)
            | Self::Livestream(id)
            | Self::LivestreamIdsByUser(id)
            | Self::TagIdsByLivestream(id)
            | Self::LivestreamIdsByTag(id) => write!(f, "{}:{id}", self.kind()),
            Self::UserIdByName(name) => write!(f, "{}:{name}", self.kind()),
            Self::TagCatalog => write!(f, "{}", self.kind()),
        }
    }
}

/// Key of the singleton tag catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllTags;

/// Every tag, indexed by id and by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagCatalog {
    tags: Vec<TagRecord>,
    by_id: HashMap<i64, usize>,
    by_name: HashMap<String, usize>,
}

impl TagCatalog {
    pub fn new(tags: Vec<TagRecord>) -> Self {
        let by_id = tags.iter().enumerate().map(|(i, t)| (t.id, i)).collect();
        let by_name = tags
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();
        Self {
            tags,
            by_id,
            by_name,
        }
    }

    pub fn all(&self) -> &[TagRecord] {
        &self.tags
    }

    pub fn by_id(&self, id: i64) -> Option<&TagRecord> {
        self.by_id.get(&id).map(|&i| &self.tags[i])
    }

    pub fn by_name(&self, name: &str) -> Option<&TagRecord> {
        self.by_name.get(name).map(|&i| &self.tags[i])
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// All caches used by the repository, built once at startup.
///
/// List-valued caches hold `Arc<[i64]>` so hits are cheap to clone.
#[derive(Debug)]
pub struct CacheRegistry {
    pub users: ReadThroughCache<i64, UserRecord>,
    pub user_ids_by_name: ReadThroughCache<String, i64>,
    pub themes: ReadThroughCache<i64, ThemeRecord>,
    pub icon_digests: ReadThroughCache<i64, String>,
    pub livestreams: ReadThroughCache<i64, LivestreamRecord>,
    pub livestream_ids_by_user: ReadThroughCache<i64, Arc<[i64]>>,
    pub tag_ids_by_livestream: ReadThroughCache<i64, Arc<[i64]>>,
    pub livestream_ids_by_tag: ReadThroughCache<i64, Arc<[i64]>>,
    pub tag_catalog: ReadThroughCache<AllTags, Arc<TagCatalog>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self {
            users: ReadThroughCache::new(CacheKind::User.name()),
            user_ids_by_name: ReadThroughCache::new(CacheKind::UserIdByName.name()),
            themes: ReadThroughCache::new(CacheKind::Theme.name()),
            icon_digests: ReadThroughCache::new(CacheKind::IconDigest.name()),
            livestreams: ReadThroughCache::new(CacheKind::Livestream.name()),
            livestream_ids_by_user: ReadThroughCache::new(CacheKind::LivestreamIdsByUser.name()),
            tag_ids_by_livestream: ReadThroughCache::new(CacheKind::TagIdsByLivestream.name()),
            livestream_ids_by_tag: ReadThroughCache::new(CacheKind::LivestreamIdsByTag.name()),
            tag_catalog: ReadThroughCache::new(CacheKind::TagCatalog.name()),
        }
    }

    /// Removes the entry for `key` from the cache it belongs to.
    pub fn invalidate_key(&self, key: &CacheKey) -> bool {
        match key {
            CacheKey::User(id) => self.users.invalidate(id),
            CacheKey::UserIdByName(name) => self.user_ids_by_name.invalidate(name),
            CacheKey::Theme(id) => self.themes.invalidate(id),
            CacheKey::IconDigest(id) => self.icon_digests.invalidate(id),
            CacheKey::Livestream(id) => self.livestreams.invalidate(id),
            CacheKey::LivestreamIdsByUser(id) => self.livestream_ids_by_user.invalidate(id),
            CacheKey::TagIdsByLivestream(id) => self.tag_ids_by_livestream.invalidate(id),
            CacheKey::LivestreamIdsByTag(id) => self.livestream_ids_by_tag.invalidate(id),
            CacheKey::TagCatalog => self.tag_catalog.invalidate(&AllTags),
        }
    }

    /// Empties every cache.
    pub fn clear_all(&self) {
        self.users.clear();
        self.user_ids_by_name.clear();
        self.themes.clear();
        self.icon_digests.clear();
        self.livestreams.clear();
        self.livestream_ids_by_user.clear();
        self.tag_ids_by_livestream.clear();
        self.livestream_ids_by_tag.clear();
        self.tag_catalog.clear();
        tracing::info!("all caches cleared");
    }

    /// Statistics for one cache.
    pub fn stats(&self, kind: CacheKind) -> CacheStats {
        match kind {
            CacheKind::User => self.users.stats(),
            CacheKind::UserIdByName => self.user_ids_by_name.stats(),
            CacheKind::Theme => self.themes.stats(),
            CacheKind::IconDigest => self.icon_digests.stats(),
            CacheKind::Livestream => self.livestreams.stats(),
            CacheKind::LivestreamIdsByUser => self.livestream_ids_by_user.stats(),
            CacheKind::TagIdsByLivestream => self.tag_ids_by_livestream.stats(),
            CacheKind::LivestreamIdsByTag => self.livestream_ids_by_tag.stats(),
            CacheKind::TagCatalog => self.tag_catalog.stats(),
        }
    }

    /// Total number of entries across every cache.
    pub fn total_entries(&self) -> usize {
        CacheKind::ALL.iter().map(|&kind| self.stats(kind).size).sum()
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InvalidationSink for CacheRegistry {
    async fn invalidate(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.invalidate_key(key);
        Ok(())
    }
}
