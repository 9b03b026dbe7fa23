//! Shared table state for the in-memory backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use papaya::HashMap as PapayaHashMap;
use parking_lot::RwLock;
use tokio::sync::Mutex;

use livepipe_storage::{
    EntityStore, IconRecord, LivestreamRecord, ReservationRecord, ReservationSlot, StorageError,
    StorageResult, StoreTransaction, TagRecord, ThemeRecord, UserRecord,
};

use crate::transaction::MemoryTransaction;

/// Monotonic id allocator for one table. Ids start at 1.
#[derive(Debug, Default)]
pub(crate) struct Sequence(i64);

impl Sequence {
    pub(crate) fn next(&mut self) -> i64 {
        self.0 += 1;
        self.0
    }
}

/// A livestream-to-tag link row.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TagLink {
    pub livestream_id: i64,
    pub tag_id: i64,
}

/// Row maps of every table. Used both for the committed tables and for the
/// rows a transaction has written but not yet committed.
#[derive(Debug, Default)]
pub(crate) struct Rows {
    pub users: BTreeMap<i64, UserRecord>,
    /// Keyed by user id.
    pub themes: BTreeMap<i64, ThemeRecord>,
    /// Keyed by user id.
    pub icons: BTreeMap<i64, IconRecord>,
    pub livestreams: BTreeMap<i64, LivestreamRecord>,
    pub tags: BTreeMap<i64, TagRecord>,
    pub tag_links: BTreeMap<i64, TagLink>,
    pub slots: BTreeMap<i64, ReservationSlot>,
    pub reservations: BTreeMap<i64, ReservationRecord>,
}

impl Rows {
    pub(crate) fn is_empty(&self) -> bool {
        self.users.is_empty()
            && self.themes.is_empty()
            && self.icons.is_empty()
            && self.livestreams.is_empty()
            && self.tags.is_empty()
            && self.tag_links.is_empty()
            && self.slots.is_empty()
            && self.reservations.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.users.len()
            + self.themes.len()
            + self.icons.len()
            + self.livestreams.len()
            + self.tags.len()
            + self.tag_links.len()
            + self.slots.len()
            + self.reservations.len()
    }
}

/// Id sequences. Like database sequences they are not transactional, so a
/// rolled back insert leaves a gap.
#[derive(Debug, Default)]
pub(crate) struct Sequences {
    pub user: Sequence,
    pub theme: Sequence,
    pub icon: Sequence,
    pub livestream: Sequence,
    pub tag: Sequence,
    pub link: Sequence,
    pub slot: Sequence,
    pub reservation: Sequence,
}

/// Committed state.
#[derive(Debug, Default)]
pub(crate) struct Tables {
    pub rows: Rows,
    pub user_ids_by_name: HashMap<String, i64>,
    pub seq: Sequences,
}

impl Tables {
    /// Applies a transaction's rows. Unique constraints are checked again
    /// against what other transactions committed meanwhile; on conflict
    /// nothing is applied.
    pub(crate) fn apply(&mut self, local: Rows) -> StorageResult<()> {
        for user in local.users.values() {
            if let Some(&owner) = self.user_ids_by_name.get(&user.name)
                && owner != user.id
                && local.users.get(&owner).is_none_or(|u| u.name == user.name)
            {
                return Err(StorageError::already_exists("user", &user.name));
            }
        }
        for theme in local.themes.values() {
            if let Some(existing) = self.rows.themes.get(&theme.user_id)
                && existing.id != theme.id
            {
                return Err(StorageError::already_exists("theme", theme.user_id));
            }
        }
        for tag in local.tags.values() {
            if self.rows.tags.values().any(|t| t.name == tag.name) {
                return Err(StorageError::already_exists("tag", &tag.name));
            }
        }
        for link in local.tag_links.values() {
            if self
                .rows
                .tag_links
                .values()
                .any(|l| l.livestream_id == link.livestream_id && l.tag_id == link.tag_id)
            {
                return Err(StorageError::already_exists(
                    "livestream_tag",
                    format!("{}:{}", link.livestream_id, link.tag_id),
                ));
            }
        }

        for (id, user) in local.users {
            if let Some(previous) = self.rows.users.get(&id)
                && previous.name != user.name
                && self.user_ids_by_name.get(&previous.name) == Some(&id)
            {
                self.user_ids_by_name.remove(&previous.name);
            }
            self.user_ids_by_name.insert(user.name.clone(), id);
            self.rows.users.insert(id, user);
        }
        self.rows.themes.extend(local.themes);
        self.rows.icons.extend(local.icons);
        self.rows.livestreams.extend(local.livestreams);
        self.rows.tags.extend(local.tags);
        self.rows.tag_links.extend(local.tag_links);
        // Changed slot rows are held under this transaction's slot locks, so
        // no other writer touched them since they were read.
        self.rows.slots.extend(local.slots);
        self.rows.reservations.extend(local.reservations);
        Ok(())
    }
}

pub(crate) struct Shared {
    pub tables: RwLock<Tables>,
    /// One exclusive lock per slot row, held by the owning transaction.
    pub slot_locks: PapayaHashMap<i64, Arc<Mutex<()>>>,
}

impl Shared {
    pub(crate) fn slot_lock(&self, slot_id: i64) -> Arc<Mutex<()>> {
        let guard = self.slot_locks.pin();
        guard
            .get_or_insert_with(slot_id, || Arc::new(Mutex::new(())))
            .clone()
    }
}

/// In-memory entity store.
///
/// Each transaction buffers its writes and applies them to the shared tables
/// when it commits, so other transactions only ever read committed rows.
/// Slot rows are additionally guarded by exclusive per-slot locks held
/// until the owning transaction ends.
///
/// Cloning is cheap; clones share the same tables.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                slot_locks: PapayaHashMap::new(),
            }),
        }
    }

    /// Returns a snapshot of one slot row, bypassing transactions.
    #[must_use]
    pub fn slot_snapshot(&self, slot_id: i64) -> Option<ReservationSlot> {
        self.shared.tables.read().rows.slots.get(&slot_id).copied()
    }

    /// Number of reservation rows, bypassing transactions.
    #[must_use]
    pub fn reservation_count(&self) -> usize {
        self.shared.tables.read().rows.reservations.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.shared.tables.read();
        f.debug_struct("MemoryStore")
            .field("users", &tables.rows.users.len())
            .field("livestreams", &tables.rows.livestreams.len())
            .field("slots", &tables.rows.slots.len())
            .finish()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn begin(&self) -> StorageResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(MemoryTransaction::new(Arc::clone(&self.shared))))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
