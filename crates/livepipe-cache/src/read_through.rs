//! Generic read-through cache.
//!
//! A [`ReadThroughCache`] maps keys to values derived from the entity store.
//! Entries are created lazily by [`fetch`](ReadThroughCache::fetch) and only
//! ever removed, never updated in place. There is no eviction and no size
//! bound.
//!
//! ## Stale fills
//!
//! A loader may read the store just before a concurrent transaction commits
//! and invalidates the same key. To keep such a pre-commit value from being
//! stored after the invalidation, every cache carries an invalidation epoch:
//! [`invalidate`](ReadThroughCache::invalidate) and
//! [`clear`](ReadThroughCache::clear) bump it before removing entries, and a
//! fill whose loader started under an older epoch is returned to its caller
//! but not stored. The epoch is per cache, so an invalidation may also
//! discard unrelated fills that were in flight; those simply miss again.

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::metrics;

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries currently in the cache.
    pub size: usize,
    /// Number of lookups answered from memory.
    pub hits: u64,
    /// Number of lookups that found no entry.
    pub misses: u64,
    /// Number of loaded values stored.
    pub fills: u64,
    /// Number of loaded values dropped because an invalidation raced the load.
    pub stale_fills: u64,
    /// Number of entries removed by `invalidate`.
    pub invalidations: u64,
}

impl CacheStats {
    /// Calculate hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// A concurrent key/value cache filled from the store on miss.
pub struct ReadThroughCache<K, V> {
    name: &'static str,
    entries: DashMap<K, V>,
    epoch: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    fills: AtomicU64,
    stale_fills: AtomicU64,
    invalidations: AtomicU64,
}

impl<K, V> ReadThroughCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Clone,
{
    /// Creates an empty cache. `name` labels logs and metrics.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            epoch: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            fills: AtomicU64::new(0),
            stale_fills: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Looks up `key` in memory only.
    pub fn get(&self, key: &K) -> Option<V> {
        match self.entries.get(key).map(|entry| entry.value().clone()) {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_hit(self.name);
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_miss(self.name);
                None
            }
        }
    }

    /// Returns the cached value for `key`, or awaits `loader` on a miss.
    ///
    /// `Some` results are stored under `key` unless the cache was
    /// invalidated while the loader ran. `None` results are never stored, so
    /// a later fetch asks the store again. Loader errors are returned
    /// unchanged and leave the cache untouched.
    ///
    /// `loader` is only polled on a miss.
    pub async fn fetch<F, E>(&self, key: K, loader: F) -> Result<Option<V>, E>
    where
        F: Future<Output = Result<Option<V>, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(Some(value));
        }

        let epoch = self.epoch.load(Ordering::Acquire);
        let loaded = loader.await?;

        if let Some(value) = &loaded {
            self.store_if_current(key, value.clone(), epoch);
        }
        Ok(loaded)
    }

    fn store_if_current(&self, key: K, value: V, epoch: u64) {
        // The shard lock held by `entry` orders this check against the
        // remove in `invalidate`, which runs after the epoch bump.
        match self.entries.entry(key) {
            Entry::Occupied(_) => {}
            Entry::Vacant(vacant) => {
                if self.epoch.load(Ordering::Acquire) == epoch {
                    vacant.insert(value);
                    self.fills.fetch_add(1, Ordering::Relaxed);
                    metrics::record_cache_fill(self.name);
                } else {
                    self.stale_fills.fetch_add(1, Ordering::Relaxed);
                    metrics::record_stale_fill(self.name);
                    tracing::debug!(cache = self.name, "discarded fill that raced an invalidation");
                }
            }
        }
    }

    /// Removes `key`. Returns `true` if an entry was present.
    pub fn invalidate(&self, key: &K) -> bool {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let removed = self.entries.remove(key).is_some();
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_invalidation(self.name);
        tracing::debug!(cache = self.name, key = ?key, removed, "cache entry invalidated");
        removed
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.entries.clear();
        tracing::debug!(cache = self.name, "cache cleared");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fills: self.fills.load(Ordering::Relaxed),
            stale_fills: self.stale_fills.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

impl<K, V> fmt::Debug for ReadThroughCache<K, V>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadThroughCache")
            .field("name", &self.name)
            .field("size", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, PartialEq)]
    struct User {
        id: i64,
        name: &'static str,
    }

    #[tokio::test]
    async fn fetch_fills_and_get_hits_without_loader() {
        let cache: ReadThroughCache<i64, User> = ReadThroughCache::new("users");
        let calls = AtomicUsize::new(0);

        assert!(cache.get(&42).is_none());

        let loaded = cache
            .fetch(42, async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(Some(User { id: 42, name: "alice" }))
            })
            .await
            .unwrap();
        assert_eq!(loaded, Some(User { id: 42, name: "alice" }));

        assert_eq!(cache.get(&42), Some(User { id: 42, name: "alice" }));

        let again = cache
            .fetch(42, async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(Some(User { id: 42, name: "stale" }))
            })
            .await
            .unwrap();
        assert_eq!(again.unwrap().name, "alice");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_exactly_one_reload() {
        let cache: ReadThroughCache<i64, User> = ReadThroughCache::new("users");
        let calls = AtomicUsize::new(0);
        let load = |name: &'static str| {
            let calls = &calls;
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(Some(User { id: 42, name }))
            }
        };

        cache.fetch(42, load("alice")).await.unwrap();
        assert!(cache.invalidate(&42));
        assert!(cache.get(&42).is_none());

        let fresh = cache.fetch(42, load("alicia")).await.unwrap().unwrap();
        assert_eq!(fresh.name, "alicia");
        let cached = cache.fetch(42, load("unused")).await.unwrap().unwrap();
        assert_eq!(cached.name, "alicia");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!cache.invalidate(&7));
    }

    #[tokio::test]
    async fn store_misses_are_not_cached() {
        let cache: ReadThroughCache<String, i64> = ReadThroughCache::new("user_ids_by_name");

        let missing = cache
            .fetch("ghost".to_string(), async { Ok::<_, ()>(None) })
            .await
            .unwrap();
        assert!(missing.is_none());
        assert!(cache.is_empty());

        let found = cache
            .fetch("ghost".to_string(), async { Ok::<_, ()>(Some(9)) })
            .await
            .unwrap();
        assert_eq!(found, Some(9));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn loader_errors_propagate_and_leave_cache_empty() {
        let cache: ReadThroughCache<i64, i64> = ReadThroughCache::new("themes");
        let err = cache
            .fetch(1, async { Err::<Option<i64>, _>("connection reset") })
            .await
            .unwrap_err();
        assert_eq!(err, "connection reset");
        assert!(cache.get(&1).is_none());
    }

    #[tokio::test]
    async fn invalidation_during_load_discards_the_fill() {
        let cache: ReadThroughCache<i64, &'static str> = ReadThroughCache::new("livestreams");

        let loaded = cache
            .fetch(5, async {
                // A concurrent commit invalidates the key mid-load.
                cache.invalidate(&5);
                Ok::<_, ()>(Some("pre-commit"))
            })
            .await
            .unwrap();

        assert_eq!(loaded, Some("pre-commit"));
        assert!(cache.get(&5).is_none());
        assert_eq!(cache.stats().stale_fills, 1);

        cache
            .fetch(5, async { Ok::<_, ()>(Some("committed")) })
            .await
            .unwrap();
        assert_eq!(cache.get(&5), Some("committed"));
    }

    #[tokio::test]
    async fn clear_empties_cache() {
        let cache: ReadThroughCache<i64, i64> = ReadThroughCache::new("icons");
        for id in 0..10 {
            cache.fetch(id, async move { Ok::<_, ()>(Some(id)) }).await.unwrap();
        }
        assert_eq!(cache.len(), 10);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn stats_track_hits_and_misses() {
        let cache: ReadThroughCache<i64, i64> = ReadThroughCache::new("stats");
        cache.fetch(1, async { Ok::<_, ()>(Some(1)) }).await.unwrap();
        cache.get(&1);
        cache.get(&1);
        cache.get(&2);

        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.fills, 1);
        assert!((stats.hit_rate() - 50.0).abs() < f64::EPSILON);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_fetches_converge() {
        let cache: Arc<ReadThroughCache<i64, i64>> = Arc::new(ReadThroughCache::new("concurrent"));
        let mut handles = Vec::new();
        for task in 0..32i64 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                let key = task % 4;
                cache
                    .fetch(key, async move { Ok::<_, ()>(Some(key * 100)) })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            let value = handle.await.unwrap().unwrap();
            assert_eq!(value % 100, 0);
        }
        assert_eq!(cache.len(), 4);
        for key in 0..4 {
            assert_eq!(cache.get(&key), Some(key * 100));
        }
    }
}
