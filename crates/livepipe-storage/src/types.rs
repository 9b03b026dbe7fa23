//! Row types exchanged with entity store backends.
//!
//! All timestamps are Unix seconds. Ids are assigned by the backend on insert.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A half-open time range `[start_at, end_at)` in Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_at: i64,
    pub end_at: i64,
}

impl TimeWindow {
    /// Creates a new window. Does not validate ordering; see [`TimeWindow::is_empty`].
    #[must_use]
    pub const fn new(start_at: i64, end_at: i64) -> Self {
        Self { start_at, end_at }
    }

    /// Returns `true` if the window contains no instant.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start_at >= self.end_at
    }

    /// Returns `true` if both windows share at least one instant.
    #[must_use]
    pub const fn intersects(&self, other: &TimeWindow) -> bool {
        self.start_at < other.end_at && other.start_at < self.end_at
    }

    /// Length of the window in seconds, zero when empty.
    #[must_use]
    pub const fn duration_secs(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.end_at - self.start_at
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start_at, self.end_at)
    }
}

/// A stored user row.
///
/// The credential is an opaque pre-hashed value supplied by the caller; it is
/// never serialized and is redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub description: String,
    #[serde(skip_serializing, default)]
    pub credential: String,
}

impl fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("display_name", &self.display_name)
            .field("description", &self.description)
            .field("credential", &"<redacted>")
            .finish()
    }
}

/// Fields for inserting a new user.
#[derive(Clone, PartialEq, Eq)]
pub struct NewUser {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub credential: String,
}

impl fmt::Debug for NewUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewUser")
            .field("name", &self.name)
            .field("display_name", &self.display_name)
            .field("description", &self.description)
            .field("credential", &"<redacted>")
            .finish()
    }
}

/// A user's theme settings. Exactly one per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeRecord {
    pub id: i64,
    pub user_id: i64,
    pub dark_mode: bool,
}

/// A user's current icon, referencing a blob by digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IconRecord {
    pub id: i64,
    pub user_id: i64,
    pub image_digest: String,
}

/// A stored livestream row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivestreamRecord {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub playlist_url: String,
    pub thumbnail_url: String,
    pub start_at: i64,
    pub end_at: i64,
    pub reservation_id: Option<i64>,
}

impl LivestreamRecord {
    #[must_use]
    pub const fn window(&self) -> TimeWindow {
        TimeWindow::new(self.start_at, self.end_at)
    }
}

/// Fields for inserting a new livestream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLivestream {
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub playlist_url: String,
    pub thumbnail_url: String,
    pub window: TimeWindow,
    pub reservation_id: Option<i64>,
}

/// A tag row. Tag names are unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagRecord {
    pub id: i64,
    pub name: String,
}

/// A bookable slot with a fixed capacity and a remaining counter.
///
/// Backends keep `0 <= remaining <= capacity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationSlot {
    pub id: i64,
    pub start_at: i64,
    pub end_at: i64,
    pub remaining: i64,
    pub capacity: i64,
}

impl ReservationSlot {
    #[must_use]
    pub const fn window(&self) -> TimeWindow {
        TimeWindow::new(self.start_at, self.end_at)
    }

    /// Number of reservations currently holding this slot.
    #[must_use]
    pub const fn booked(&self) -> i64 {
        self.capacity - self.remaining
    }
}

/// A committed booking against one or more slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub id: i64,
    pub user_id: i64,
    pub start_at: i64,
    pub end_at: i64,
    pub created_at: i64,
}

/// Fields for inserting a new reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewReservation {
    pub user_id: i64,
    pub window: TimeWindow,
    pub created_at: i64,
}
