//! Composed views and request payloads.

use serde::{Deserialize, Serialize};

use livepipe_storage::{LivestreamRecord, TagRecord, TimeWindow, UserRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeView {
    pub id: i64,
    pub dark_mode: bool,
}

/// A user with theme and icon digest, as returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserView {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub theme: ThemeView,
    pub icon_hash: String,
}

impl UserView {
    pub(crate) fn compose(user: UserRecord, theme: ThemeView, icon_hash: String) -> Self {
        Self {
            id: user.id,
            name: user.name,
            display_name: user.display_name,
            description: user.description,
            theme,
            icon_hash,
        }
    }
}

/// A livestream with its owner and tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivestreamView {
    pub id: i64,
    pub owner: UserView,
    pub title: String,
    pub description: String,
    pub playlist_url: String,
    pub thumbnail_url: String,
    pub tags: Vec<TagRecord>,
    pub start_at: i64,
    pub end_at: i64,
}

impl LivestreamView {
    pub(crate) fn compose(record: LivestreamRecord, owner: UserView, tags: Vec<TagRecord>) -> Self {
        Self {
            id: record.id,
            owner,
            title: record.title,
            description: record.description,
            playlist_url: record.playlist_url,
            thumbnail_url: record.thumbnail_url,
            tags,
            start_at: record.start_at,
            end_at: record.end_at,
        }
    }
}

/// Profile fields to change; `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
}

/// A request to reserve a livestream slot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReserveLivestream {
    #[serde(default)]
    pub tags: Vec<i64>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub playlist_url: String,
    #[serde(default)]
    pub thumbnail_url: String,
    pub start_at: i64,
    pub end_at: i64,
}

impl ReserveLivestream {
    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.start_at, self.end_at)
    }
}

/// Which livestreams a search returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivestreamQuery {
    /// Every livestream, newest first, optionally limited.
    All { limit: Option<u32> },
    /// Livestreams carrying any tag with this name, newest first.
    ByTag(String),
}

impl LivestreamQuery {
    /// Builds a query from the optional `tag` and `limit` parameters of a
    /// search request. A non-empty tag wins over the limit.
    pub fn from_params(tag: Option<&str>, limit: Option<u32>) -> Self {
        match tag {
            Some(tag) if !tag.is_empty() => Self::ByTag(tag.to_string()),
            _ => Self::All { limit },
        }
    }
}
