//! # livepipe-cache
//!
//! In-process caches in front of the entity store.
//!
//! - [`ReadThroughCache`]: generic key/value cache filled from the store on
//!   miss. Store misses are never cached and loader errors pass through.
//! - [`CacheRegistry`]: the fixed set of caches the repository uses.
//! - [`INVALIDATION_RULES`] and [`Mutation`]: which cache entries each kind
//!   of write makes stale.
//! - [`InvalidatingTransaction`]: wraps a store transaction and deletes the
//!   affected entries after a successful commit.
//!
//! ## Example
//!
//! ```ignore
//! let registry = Arc::new(CacheRegistry::new());
//! let coordinator = InvalidationCoordinator::new(store, registry.clone());
//!
//! let mut tx = coordinator.begin().await?;
//! tx.update_theme(user_id, true).await?;
//! tx.record(Mutation::ThemeUpdated { user_id });
//! tx.commit().await?; // themes[user_id] is gone from the cache
//! ```

mod error;
mod invalidation;
pub mod metrics;
mod read_through;
mod registry;
mod transaction;

pub use error::CacheError;
pub use invalidation::{
    INVALIDATION_RULES, InvalidationRule, InvalidationSink, Mutation, MutationKind, rule_for,
};
pub use read_through::{CacheStats, ReadThroughCache};
pub use registry::{AllTags, CacheKey, CacheKind, CacheRegistry, TagCatalog};
pub use transaction::{InvalidatingTransaction, InvalidationCoordinator};
