//! Admission control for capacity-limited reservation slots.
//!
//! Every slot row carries a `remaining` counter. A booking locks all slots
//! intersecting its window (in ascending `start_at` order, so concurrent
//! bookings cannot deadlock), refuses if any of them is full, and otherwise
//! decrements each one and records the reservation, all inside the caller's
//! transaction. Bookings over disjoint windows touch disjoint rows and never
//! wait on each other.

use metrics::counter;
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

use livepipe_storage::{
    EntityStore, NewReservation, ReservationRecord, StoreTransaction, TimeWindow,
};

use crate::error::{CoreError, Result};

/// Start of the default bookable term, 2023-11-25T01:00:00Z.
pub const DEFAULT_TERM_START: i64 = 1_700_874_000;
/// End of the default bookable term, 2024-11-25T01:00:00Z.
pub const DEFAULT_TERM_END: i64 = 1_732_496_400;
/// Default slot length (one hour).
pub const DEFAULT_SLOT_SECONDS: i64 = 3600;

const ADMITTED_TOTAL: &str = "livepipe_reservations_admitted_total";
const REJECTED_TOTAL: &str = "livepipe_reservations_rejected_total";

/// A booking request for one user over one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationRequest {
    pub user_id: i64,
    pub window: TimeWindow,
}

/// A successful booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub reservation: ReservationRecord,
    /// Ids of the slots that were decremented, ascending by start time.
    pub slot_ids: Vec<i64>,
}

/// Result of a booking attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum ReserveOutcome<T = Admission> {
    Reserved(T),
    /// At least one intersecting slot was full, or no slot intersects the
    /// window. Nothing was written.
    CapacityExceeded,
}

impl<T> ReserveOutcome<T> {
    pub fn is_reserved(&self) -> bool {
        matches!(self, Self::Reserved(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ReserveOutcome<U> {
        match self {
            Self::Reserved(value) => ReserveOutcome::Reserved(f(value)),
            Self::CapacityExceeded => ReserveOutcome::CapacityExceeded,
        }
    }

    pub fn reserved(self) -> Option<T> {
        match self {
            Self::Reserved(value) => Some(value),
            Self::CapacityExceeded => None,
        }
    }
}

/// Books reservations against provisioned slots without overbooking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationAllocator {
    term: TimeWindow,
}

impl Default for ReservationAllocator {
    fn default() -> Self {
        Self::new(TimeWindow::new(DEFAULT_TERM_START, DEFAULT_TERM_END))
    }
}

impl ReservationAllocator {
    pub fn new(term: TimeWindow) -> Self {
        Self { term }
    }

    /// The period in which bookings are accepted.
    pub fn term(&self) -> TimeWindow {
        self.term
    }

    /// Rejects empty windows and windows entirely outside the term.
    pub fn validate(&self, window: TimeWindow) -> Result<()> {
        if window.is_empty() {
            return Err(CoreError::invalid_request(format!(
                "reservation window {window} is empty"
            )));
        }
        if !window.intersects(&self.term) {
            return Err(CoreError::invalid_request(format!(
                "reservation window {window} is outside the term {}",
                self.term
            )));
        }
        Ok(())
    }

    /// Attempts a booking inside the caller's transaction.
    ///
    /// On [`ReserveOutcome::CapacityExceeded`] nothing has been written, but
    /// the slot locks are held until the caller ends the transaction, which
    /// it should roll back.
    #[instrument(skip(self, tx), fields(user_id = request.user_id, window = %request.window))]
    pub async fn try_reserve(
        &self,
        tx: &mut dyn StoreTransaction,
        request: ReservationRequest,
    ) -> Result<ReserveOutcome> {
        self.validate(request.window)?;

        let slots = tx.lock_slots(request.window).await?;
        if slots.is_empty() {
            debug!("no slot intersects the window");
            counter!(REJECTED_TOTAL, "reason" => "no_slots").increment(1);
            return Ok(ReserveOutcome::CapacityExceeded);
        }
        if let Some(full) = slots.iter().find(|slot| slot.remaining < 1) {
            debug!(slot_id = full.id, window = %full.window(), "slot is full");
            counter!(REJECTED_TOTAL, "reason" => "full").increment(1);
            return Ok(ReserveOutcome::CapacityExceeded);
        }

        let slot_ids: Vec<i64> = slots.iter().map(|slot| slot.id).collect();
        tx.decrement_slots(&slot_ids).await?;
        let reservation = tx
            .insert_reservation(&NewReservation {
                user_id: request.user_id,
                window: request.window,
                created_at: OffsetDateTime::now_utc().unix_timestamp(),
            })
            .await?;

        counter!(ADMITTED_TOTAL).increment(1);
        debug!(
            reservation_id = reservation.id,
            slots = slot_ids.len(),
            "reservation admitted"
        );
        Ok(ReserveOutcome::Reserved(Admission {
            reservation,
            slot_ids,
        }))
    }

    /// Books in a transaction of its own: commits on success and rolls
    /// back on [`ReserveOutcome::CapacityExceeded`] or error.
    pub async fn reserve(
        &self,
        store: &dyn EntityStore,
        request: ReservationRequest,
    ) -> Result<ReserveOutcome> {
        let mut tx = store.begin().await?;
        match self.try_reserve(tx.as_mut(), request).await {
            Ok(ReserveOutcome::Reserved(admission)) => {
                tx.commit().await?;
                Ok(ReserveOutcome::Reserved(admission))
            }
            Ok(ReserveOutcome::CapacityExceeded) => {
                tx.rollback().await?;
                Ok(ReserveOutcome::CapacityExceeded)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    debug!(error = %rollback_err, "rollback after failed reservation");
                }
                Err(err)
            }
        }
    }
}

/// Splits `term` into consecutive windows of `slot_seconds`; the last one is
/// cut at the end of the term.
pub fn slot_grid(term: TimeWindow, slot_seconds: i64) -> Result<Vec<TimeWindow>> {
    if slot_seconds <= 0 {
        return Err(CoreError::invalid_request(format!(
            "slot length must be positive, got {slot_seconds}"
        )));
    }
    let mut windows = Vec::with_capacity((term.duration_secs() / slot_seconds + 1) as usize);
    let mut start = term.start_at;
    while start < term.end_at {
        let end = start.saturating_add(slot_seconds).min(term.end_at);
        windows.push(TimeWindow::new(start, end));
        start = end;
    }
    Ok(windows)
}

/// Creates the slot grid over `term`, each slot with `capacity` places.
/// Returns the number of slots created.
#[instrument(skip(tx))]
pub async fn provision_slots(
    tx: &mut dyn StoreTransaction,
    term: TimeWindow,
    slot_seconds: i64,
    capacity: i64,
) -> Result<u64> {
    if capacity < 0 {
        return Err(CoreError::invalid_request(format!(
            "slot capacity must not be negative, got {capacity}"
        )));
    }
    let windows = slot_grid(term, slot_seconds)?;
    let created = tx.insert_slots(&windows, capacity).await?;
    info!(created, capacity, "reservation slots provisioned");
    Ok(created)
}
