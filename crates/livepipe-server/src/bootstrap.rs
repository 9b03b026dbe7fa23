//! Startup work run once the state is built.

use anyhow::Context;
use livepipe_repository::provision_slots;
use livepipe_storage::{EntityStore, StoreTransaction};

use crate::state::AppState;

/// What [`initialize`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BootstrapReport {
    /// Slots that already existed before startup
    pub existing_slots: i64,
    pub slots_created: u64,
}

/// Clears every cache and, when enabled and the store has no slots yet,
/// provisions the reservation slot grid. Safe to run on every start.
pub async fn initialize(state: &AppState) -> anyhow::Result<BootstrapReport> {
    state.repository.reset_caches();

    let reservations = &state.config.reservations;
    let mut tx = state
        .repository
        .store()
        .begin()
        .await
        .context("failed to begin bootstrap transaction")?;
    let existing_slots = tx.slot_count().await?;

    let mut report = BootstrapReport {
        existing_slots,
        slots_created: 0,
    };
    if reservations.provision_on_startup && existing_slots == 0 {
        report.slots_created = provision_slots(
            tx.as_mut(),
            reservations.term(),
            reservations.slot_seconds,
            reservations.capacity,
        )
        .await
        .context("failed to provision reservation slots")?;
        tx.commit().await?;
    } else {
        tx.rollback().await?;
    }

    tracing::info!(
        existing_slots = report.existing_slots,
        slots_created = report.slots_created,
        "Bootstrap complete"
    );
    Ok(report)
}
