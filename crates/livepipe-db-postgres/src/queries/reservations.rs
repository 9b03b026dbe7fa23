//! Reservation slot and reservation queries.
//!
//! Slot rows are locked with `SELECT ... FOR UPDATE`; the sort runs below the
//! row-locking step, so locks are taken in ascending `start_at` order.

use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use sqlx_postgres::PgTransaction;
use tracing::{debug, instrument};

use livepipe_storage::{
    NewReservation, ReservationRecord, ReservationSlot, StorageError, StorageResult, TimeWindow,
};

use crate::error::query_error;

type SlotRow = (i64, i64, i64, i64, i64);

fn slot_from_row((id, start_at, end_at, remaining, capacity): SlotRow) -> ReservationSlot {
    ReservationSlot {
        id,
        start_at,
        end_at,
        remaining,
        capacity,
    }
}

#[instrument(skip(tx), fields(window = %window))]
pub async fn lock_slots(
    tx: &mut PgTransaction<'_>,
    window: TimeWindow,
) -> StorageResult<Vec<ReservationSlot>> {
    let rows: Vec<SlotRow> = query_as(
        "SELECT id, start_at, end_at, slot, capacity FROM reservation_slots \
         WHERE start_at < $2 AND end_at > $1 \
         ORDER BY start_at, id FOR UPDATE",
    )
    .bind(window.start_at)
    .bind(window.end_at)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| query_error("reservation_slot", window, e))?;

    debug!(locked = rows.len(), "reservation slots locked");
    Ok(rows.into_iter().map(slot_from_row).collect())
}

#[instrument(skip(tx), fields(window = %window))]
pub async fn slots_in(
    tx: &mut PgTransaction<'_>,
    window: TimeWindow,
) -> StorageResult<Vec<ReservationSlot>> {
    let rows: Vec<SlotRow> = query_as(
        "SELECT id, start_at, end_at, slot, capacity FROM reservation_slots \
         WHERE start_at < $2 AND end_at > $1 ORDER BY start_at, id",
    )
    .bind(window.start_at)
    .bind(window.end_at)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| query_error("reservation_slot", window, e))?;

    Ok(rows.into_iter().map(slot_from_row).collect())
}

#[instrument(skip(tx))]
pub async fn decrement_slots(tx: &mut PgTransaction<'_>, slot_ids: &[i64]) -> StorageResult<()> {
    let mut ids = slot_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();

    let available: i64 = query_scalar(
        "SELECT COUNT(*) FROM reservation_slots WHERE id = ANY($1) AND slot >= 1",
    )
    .bind(ids.as_slice())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| query_error("reservation_slot", "*", e))?;

    if available != ids.len() as i64 {
        return Err(StorageError::constraint(format!(
            "{} of {} slots have no remaining capacity",
            ids.len() as i64 - available,
            ids.len()
        )));
    }

    query("UPDATE reservation_slots SET slot = slot - 1 WHERE id = ANY($1)")
        .bind(ids.as_slice())
        .execute(&mut **tx)
        .await
        .map_err(|e| query_error("reservation_slot", "*", e))?;

    Ok(())
}

#[instrument(skip(tx, windows), fields(count = windows.len()))]
pub async fn insert_slots(
    tx: &mut PgTransaction<'_>,
    windows: &[TimeWindow],
    capacity: i64,
) -> StorageResult<u64> {
    let starts: Vec<i64> = windows.iter().map(|w| w.start_at).collect();
    let ends: Vec<i64> = windows.iter().map(|w| w.end_at).collect();

    let result = query(
        "INSERT INTO reservation_slots (start_at, end_at, slot, capacity) \
         SELECT s, e, $3, $3 FROM UNNEST($1::BIGINT[], $2::BIGINT[]) AS t(s, e)",
    )
    .bind(starts.as_slice())
    .bind(ends.as_slice())
    .bind(capacity)
    .execute(&mut **tx)
    .await
    .map_err(|e| query_error("reservation_slot", "*", e))?;

    Ok(result.rows_affected())
}

#[instrument(skip(tx))]
pub async fn slot_count(tx: &mut PgTransaction<'_>) -> StorageResult<i64> {
    query_scalar("SELECT COUNT(*) FROM reservation_slots")
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| query_error("reservation_slot", "*", e))
}

#[instrument(skip(tx, reservation), fields(user_id = reservation.user_id, window = %reservation.window))]
pub async fn insert_reservation(
    tx: &mut PgTransaction<'_>,
    reservation: &NewReservation,
) -> StorageResult<ReservationRecord> {
    let id: i64 = query_scalar(
        "INSERT INTO reservations (user_id, start_at, end_at, created_at) \
         VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(reservation.user_id)
    .bind(reservation.window.start_at)
    .bind(reservation.window.end_at)
    .bind(reservation.created_at)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| query_error("reservation", reservation.window, e))?;

    Ok(ReservationRecord {
        id,
        user_id: reservation.user_id,
        start_at: reservation.window.start_at,
        end_at: reservation.window.end_at,
        created_at: reservation.created_at,
    })
}

#[instrument(skip(tx), fields(window = %window))]
pub async fn count_reservations_in(
    tx: &mut PgTransaction<'_>,
    window: TimeWindow,
) -> StorageResult<i64> {
    query_scalar("SELECT COUNT(*) FROM reservations WHERE start_at < $2 AND end_at > $1")
        .bind(window.start_at)
        .bind(window.end_at)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| query_error("reservation", window, e))
}
