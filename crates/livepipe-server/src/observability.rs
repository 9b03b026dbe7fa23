//! Tracing setup for the server binary.
//!
//! The subscriber starts before the configuration is read; once it is
//! loaded, [`apply_logging_level`] swaps the filter in place. An explicit
//! `RUST_LOG` always takes precedence over the configured level.

use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

const LIVEPIPE_TARGETS: [&str; 7] = [
    "livepipe_blob",
    "livepipe_cache",
    "livepipe_db_memory",
    "livepipe_db_postgres",
    "livepipe_repository",
    "livepipe_server",
    "livepipe_storage",
];

/// Filter that logs livepipe crates at `level` and everything else at
/// `warn` or quieter.
pub fn filter_for(level: &str) -> EnvFilter {
    let level = level.to_ascii_lowercase();
    let others = match level.as_str() {
        "error" | "off" => level.as_str(),
        _ => "warn",
    };
    let directives: Vec<String> = std::iter::once(others.to_string())
        .chain(LIVEPIPE_TARGETS.iter().map(|t| format!("{t}={level}")))
        .collect();
    EnvFilter::new(directives.join(","))
}

/// Install the global subscriber with a reloadable filter.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for(level));
    let (filter, handle) = reload::Layer::new(filter);
    let _ = FILTER_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Replace the active filter with [`filter_for`] `level`.
pub fn apply_logging_level(level: &str) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    if let Some(handle) = FILTER_HANDLE.get()
        && let Err(e) = handle.reload(filter_for(level))
    {
        tracing::warn!(error = %e, "Failed to apply logging level");
    }
}
