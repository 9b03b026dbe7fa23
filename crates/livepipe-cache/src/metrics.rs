//! Cache metrics.
//!
//! Every counter carries a `cache` label naming the [`ReadThroughCache`]
//! instance.
//!
//! [`ReadThroughCache`]: crate::ReadThroughCache

use metrics::counter;

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "livepipe_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "livepipe_cache_misses_total";
    pub const CACHE_FILLS_TOTAL: &str = "livepipe_cache_fills_total";
    pub const CACHE_STALE_FILLS_TOTAL: &str = "livepipe_cache_stale_fills_total";
    pub const CACHE_INVALIDATIONS_TOTAL: &str = "livepipe_cache_invalidations_total";
    pub const CACHE_INVALIDATION_FAILURES_TOTAL: &str = "livepipe_cache_invalidation_failures_total";
}

pub(crate) fn record_cache_hit(cache: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "cache" => cache).increment(1);
}

pub(crate) fn record_cache_miss(cache: &'static str) {
    counter!(names::CACHE_MISSES_TOTAL, "cache" => cache).increment(1);
}

pub(crate) fn record_cache_fill(cache: &'static str) {
    counter!(names::CACHE_FILLS_TOTAL, "cache" => cache).increment(1);
}

/// A loaded value was not stored because the cache was invalidated while
/// the loader ran.
pub(crate) fn record_stale_fill(cache: &'static str) {
    counter!(names::CACHE_STALE_FILLS_TOTAL, "cache" => cache).increment(1);
}

pub(crate) fn record_cache_invalidation(cache: &'static str) {
    counter!(names::CACHE_INVALIDATIONS_TOTAL, "cache" => cache).increment(1);
}

pub(crate) fn record_invalidation_failure(cache: &'static str) {
    counter!(names::CACHE_INVALIDATION_FAILURES_TOTAL, "cache" => cache).increment(1);
}
