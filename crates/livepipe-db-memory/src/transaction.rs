//! Transactions for the in-memory backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;

use livepipe_storage::{
    IconRecord, LivestreamRecord, NewLivestream, NewReservation, NewUser, ReservationRecord,
    ReservationSlot, StorageError, StorageResult, StoreTransaction, TagRecord, ThemeRecord,
    TimeWindow, UserRecord,
};

use crate::store::{Rows, Shared, TagLink, Tables};

/// The row under `key`, preferring this transaction's own version.
fn lookup<'a, T>(
    local: &'a BTreeMap<i64, T>,
    committed: &'a BTreeMap<i64, T>,
    key: i64,
) -> Option<&'a T> {
    local.get(&key).or_else(|| committed.get(&key))
}

/// Committed rows overlaid with this transaction's rows, in id order.
fn merged<'a, T>(
    local: &'a BTreeMap<i64, T>,
    committed: &'a BTreeMap<i64, T>,
) -> BTreeMap<i64, &'a T> {
    let mut rows: BTreeMap<i64, &T> = committed.iter().map(|(id, row)| (*id, row)).collect();
    rows.extend(local.iter().map(|(id, row)| (*id, row)));
    rows
}

/// A transaction against [`MemoryStore`](crate::MemoryStore).
///
/// Writes go to a private overlay that reads of this transaction see and
/// nobody else does. Commit applies the overlay to the shared tables in one
/// step; rollback or dropping the transaction discards it. Slot locks are
/// released when the transaction is dropped, after its rows are applied.
pub struct MemoryTransaction {
    shared: Arc<Shared>,
    local: Rows,
    slot_guards: BTreeMap<i64, OwnedMutexGuard<()>>,
    completed: bool,
}

impl MemoryTransaction {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            local: Rows::default(),
            slot_guards: BTreeMap::new(),
            completed: false,
        }
    }

    fn user(&self, tables: &Tables, id: i64) -> Option<UserRecord> {
        lookup(&self.local.users, &tables.rows.users, id).cloned()
    }

    fn find_user_by_name(&self, tables: &Tables, name: &str) -> Option<UserRecord> {
        if let Some(user) = self.local.users.values().find(|u| u.name == name) {
            return Some(user.clone());
        }
        // A committed owner this transaction renamed no longer holds `name`.
        tables
            .user_ids_by_name
            .get(name)
            .filter(|id| !self.local.users.contains_key(id))
            .and_then(|id| tables.rows.users.get(id))
            .cloned()
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.completed && !self.local.is_empty() {
            tracing::debug!(
                rows = self.local.len(),
                "memory transaction dropped without commit, discarding writes"
            );
        }
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let mut this = self;
        let local = std::mem::take(&mut this.local);
        if !local.is_empty() {
            this.shared.tables.write().apply(local)?;
        }
        this.completed = true;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        let mut this = self;
        this.local = Rows::default();
        this.completed = true;
        Ok(())
    }

    async fn user_by_id(&mut self, id: i64) -> StorageResult<Option<UserRecord>> {
        let tables = self.shared.tables.read();
        Ok(self.user(&tables, id))
    }

    async fn user_by_name(&mut self, name: &str) -> StorageResult<Option<UserRecord>> {
        let tables = self.shared.tables.read();
        Ok(self.find_user_by_name(&tables, name))
    }

    async fn insert_user(&mut self, user: &NewUser) -> StorageResult<UserRecord> {
        let mut tables = self.shared.tables.write();
        if self.find_user_by_name(&tables, &user.name).is_some() {
            return Err(StorageError::already_exists("user", &user.name));
        }
        let record = UserRecord {
            id: tables.seq.user.next(),
            name: user.name.clone(),
            display_name: user.display_name.clone(),
            description: user.description.clone(),
            credential: user.credential.clone(),
        };
        self.local.users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_user(&mut self, user: &UserRecord) -> StorageResult<()> {
        let tables = self.shared.tables.read();
        let Some(previous) = self.user(&tables, user.id) else {
            return Err(StorageError::not_found("user", user.id));
        };
        if previous.name != user.name && self.find_user_by_name(&tables, &user.name).is_some() {
            return Err(StorageError::already_exists("user", &user.name));
        }
        drop(tables);
        self.local.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn theme_by_user_id(&mut self, user_id: i64) -> StorageResult<Option<ThemeRecord>> {
        let tables = self.shared.tables.read();
        Ok(lookup(&self.local.themes, &tables.rows.themes, user_id).copied())
    }

    async fn insert_theme(&mut self, user_id: i64, dark_mode: bool) -> StorageResult<ThemeRecord> {
        let mut tables = self.shared.tables.write();
        if self.user(&tables, user_id).is_none() {
            return Err(StorageError::not_found("user", user_id));
        }
        if lookup(&self.local.themes, &tables.rows.themes, user_id).is_some() {
            return Err(StorageError::already_exists("theme", user_id));
        }
        let theme = ThemeRecord {
            id: tables.seq.theme.next(),
            user_id,
            dark_mode,
        };
        self.local.themes.insert(user_id, theme);
        Ok(theme)
    }

    async fn update_theme(&mut self, user_id: i64, dark_mode: bool) -> StorageResult<ThemeRecord> {
        let tables = self.shared.tables.read();
        let Some(mut theme) = lookup(&self.local.themes, &tables.rows.themes, user_id).copied()
        else {
            return Err(StorageError::not_found("theme", user_id));
        };
        drop(tables);
        theme.dark_mode = dark_mode;
        self.local.themes.insert(user_id, theme);
        Ok(theme)
    }

    async fn icon_digest_by_user_id(&mut self, user_id: i64) -> StorageResult<Option<String>> {
        let tables = self.shared.tables.read();
        Ok(lookup(&self.local.icons, &tables.rows.icons, user_id)
            .map(|icon| icon.image_digest.clone()))
    }

    async fn replace_icon(
        &mut self,
        user_id: i64,
        image_digest: &str,
    ) -> StorageResult<IconRecord> {
        let mut tables = self.shared.tables.write();
        if self.user(&tables, user_id).is_none() {
            return Err(StorageError::not_found("user", user_id));
        }
        let icon = IconRecord {
            id: tables.seq.icon.next(),
            user_id,
            image_digest: image_digest.to_string(),
        };
        self.local.icons.insert(user_id, icon.clone());
        Ok(icon)
    }

    async fn livestream_by_id(&mut self, id: i64) -> StorageResult<Option<LivestreamRecord>> {
        let tables = self.shared.tables.read();
        Ok(lookup(&self.local.livestreams, &tables.rows.livestreams, id).cloned())
    }

    async fn livestream_ids_by_user_id(&mut self, user_id: i64) -> StorageResult<Vec<i64>> {
        let tables = self.shared.tables.read();
        Ok(merged(&self.local.livestreams, &tables.rows.livestreams)
            .values()
            .filter(|l| l.user_id == user_id)
            .map(|l| l.id)
            .collect())
    }

    async fn list_livestreams(
        &mut self,
        limit: Option<u32>,
    ) -> StorageResult<Vec<LivestreamRecord>> {
        let limit = limit.map_or(usize::MAX, |l| l as usize);
        let tables = self.shared.tables.read();
        Ok(merged(&self.local.livestreams, &tables.rows.livestreams)
            .values()
            .rev()
            .take(limit)
            .map(|l| (*l).clone())
            .collect())
    }

    async fn insert_livestream(
        &mut self,
        livestream: &NewLivestream,
    ) -> StorageResult<LivestreamRecord> {
        if livestream.window.is_empty() {
            return Err(StorageError::constraint(format!(
                "livestream window {} is empty",
                livestream.window
            )));
        }
        let mut tables = self.shared.tables.write();
        if self.user(&tables, livestream.user_id).is_none() {
            return Err(StorageError::not_found("user", livestream.user_id));
        }
        let record = LivestreamRecord {
            id: tables.seq.livestream.next(),
            user_id: livestream.user_id,
            title: livestream.title.clone(),
            description: livestream.description.clone(),
            playlist_url: livestream.playlist_url.clone(),
            thumbnail_url: livestream.thumbnail_url.clone(),
            start_at: livestream.window.start_at,
            end_at: livestream.window.end_at,
            reservation_id: livestream.reservation_id,
        };
        self.local.livestreams.insert(record.id, record.clone());
        Ok(record)
    }

    async fn all_tags(&mut self) -> StorageResult<Vec<TagRecord>> {
        let tables = self.shared.tables.read();
        Ok(merged(&self.local.tags, &tables.rows.tags)
            .into_values()
            .cloned()
            .collect())
    }

    async fn insert_tag(&mut self, name: &str) -> StorageResult<TagRecord> {
        let mut tables = self.shared.tables.write();
        if merged(&self.local.tags, &tables.rows.tags)
            .values()
            .any(|t| t.name == name)
        {
            return Err(StorageError::already_exists("tag", name));
        }
        let tag = TagRecord {
            id: tables.seq.tag.next(),
            name: name.to_string(),
        };
        self.local.tags.insert(tag.id, tag.clone());
        Ok(tag)
    }

    async fn tag_ids_by_livestream_id(&mut self, livestream_id: i64) -> StorageResult<Vec<i64>> {
        let tables = self.shared.tables.read();
        Ok(merged(&self.local.tag_links, &tables.rows.tag_links)
            .values()
            .filter(|link| link.livestream_id == livestream_id)
            .map(|link| link.tag_id)
            .collect())
    }

    async fn livestream_ids_by_tag_id(&mut self, tag_id: i64) -> StorageResult<Vec<i64>> {
        let tables = self.shared.tables.read();
        let mut ids: Vec<i64> = merged(&self.local.tag_links, &tables.rows.tag_links)
            .values()
            .filter(|link| link.tag_id == tag_id)
            .map(|link| link.livestream_id)
            .collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        ids.dedup();
        Ok(ids)
    }

    async fn attach_tag(&mut self, livestream_id: i64, tag_id: i64) -> StorageResult<i64> {
        let mut tables = self.shared.tables.write();
        if lookup(&self.local.livestreams, &tables.rows.livestreams, livestream_id).is_none() {
            return Err(StorageError::not_found("livestream", livestream_id));
        }
        if lookup(&self.local.tags, &tables.rows.tags, tag_id).is_none() {
            return Err(StorageError::not_found("tag", tag_id));
        }
        if merged(&self.local.tag_links, &tables.rows.tag_links)
            .values()
            .any(|link| link.livestream_id == livestream_id && link.tag_id == tag_id)
        {
            return Err(StorageError::already_exists(
                "livestream_tag",
                format!("{livestream_id}:{tag_id}"),
            ));
        }
        let id = tables.seq.link.next();
        self.local.tag_links.insert(
            id,
            TagLink {
                livestream_id,
                tag_id,
            },
        );
        Ok(id)
    }

    async fn lock_slots(&mut self, window: TimeWindow) -> StorageResult<Vec<ReservationSlot>> {
        let ordered: Vec<i64> = {
            let tables = self.shared.tables.read();
            let mut keys: Vec<(i64, i64)> = merged(&self.local.slots, &tables.rows.slots)
                .values()
                .filter(|slot| slot.window().intersects(&window))
                .map(|slot| (slot.start_at, slot.id))
                .collect();
            keys.sort_unstable();
            keys.into_iter().map(|(_, id)| id).collect()
        };

        for id in &ordered {
            if self.slot_guards.contains_key(id) {
                continue;
            }
            let lock = self.shared.slot_lock(*id);
            let guard = lock.lock_owned().await;
            self.slot_guards.insert(*id, guard);
        }

        // Read after locking: the previous holder has applied its rows.
        let tables = self.shared.tables.read();
        Ok(ordered
            .iter()
            .filter_map(|id| lookup(&self.local.slots, &tables.rows.slots, *id).copied())
            .collect())
    }

    async fn decrement_slots(&mut self, slot_ids: &[i64]) -> StorageResult<()> {
        let tables = self.shared.tables.read();
        let mut updated = Vec::with_capacity(slot_ids.len());
        for id in slot_ids {
            if !self.slot_guards.contains_key(id) {
                return Err(StorageError::transaction_error(format!(
                    "slot {id} is not locked by this transaction"
                )));
            }
            match lookup(&self.local.slots, &tables.rows.slots, *id) {
                None => return Err(StorageError::not_found("reservation_slot", id)),
                Some(slot) if slot.remaining < 1 => {
                    return Err(StorageError::constraint(format!(
                        "slot {id} has no remaining capacity"
                    )));
                }
                Some(slot) => updated.push(ReservationSlot {
                    remaining: slot.remaining - 1,
                    ..*slot
                }),
            }
        }
        drop(tables);
        self.local
            .slots
            .extend(updated.into_iter().map(|slot| (slot.id, slot)));
        Ok(())
    }

    async fn slots_in(&mut self, window: TimeWindow) -> StorageResult<Vec<ReservationSlot>> {
        let tables = self.shared.tables.read();
        let mut slots: Vec<ReservationSlot> = merged(&self.local.slots, &tables.rows.slots)
            .into_values()
            .filter(|slot| slot.window().intersects(&window))
            .copied()
            .collect();
        slots.sort_unstable_by_key(|slot| (slot.start_at, slot.id));
        Ok(slots)
    }

    async fn insert_slots(&mut self, windows: &[TimeWindow], capacity: i64) -> StorageResult<u64> {
        if capacity < 0 {
            return Err(StorageError::constraint(format!(
                "slot capacity must be non-negative, got {capacity}"
            )));
        }
        if let Some(empty) = windows.iter().find(|w| w.is_empty()) {
            return Err(StorageError::constraint(format!(
                "slot window {empty} is empty"
            )));
        }
        let mut tables = self.shared.tables.write();
        for window in windows {
            let id = tables.seq.slot.next();
            self.local.slots.insert(
                id,
                ReservationSlot {
                    id,
                    start_at: window.start_at,
                    end_at: window.end_at,
                    remaining: capacity,
                    capacity,
                },
            );
        }
        Ok(windows.len() as u64)
    }

    async fn slot_count(&mut self) -> StorageResult<i64> {
        let tables = self.shared.tables.read();
        Ok(merged(&self.local.slots, &tables.rows.slots).len() as i64)
    }

    async fn insert_reservation(
        &mut self,
        reservation: &NewReservation,
    ) -> StorageResult<ReservationRecord> {
        let mut tables = self.shared.tables.write();
        if self.user(&tables, reservation.user_id).is_none() {
            return Err(StorageError::not_found("user", reservation.user_id));
        }
        let record = ReservationRecord {
            id: tables.seq.reservation.next(),
            user_id: reservation.user_id,
            start_at: reservation.window.start_at,
            end_at: reservation.window.end_at,
            created_at: reservation.created_at,
        };
        self.local.reservations.insert(record.id, record);
        Ok(record)
    }

    async fn count_reservations_in(&mut self, window: TimeWindow) -> StorageResult<i64> {
        let tables = self.shared.tables.read();
        Ok(merged(&self.local.reservations, &tables.rows.reservations)
            .values()
            .filter(|r| TimeWindow::new(r.start_at, r.end_at).intersects(&window))
            .count() as i64)
    }
}
