//! Post-commit invalidation against the in-memory store.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use livepipe_cache::{
    CacheError, CacheKey, CacheRegistry, InvalidationCoordinator, InvalidationSink, Mutation,
};
use livepipe_db_memory::MemoryStore;
use livepipe_storage::{DynEntityStore, EntityStore, NewUser, StoreTransaction, ThemeRecord};

/// Records every key it is asked to invalidate and optionally fails.
#[derive(Default)]
struct RecordingSink {
    keys: Mutex<Vec<CacheKey>>,
    fail: bool,
}

#[async_trait]
impl InvalidationSink for RecordingSink {
    async fn invalidate(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.keys.lock().push(key.clone());
        if self.fail {
            Err(CacheError::invalidation(key, "sink unavailable"))
        } else {
            Ok(())
        }
    }
}

async fn seeded_store() -> (DynEntityStore, i64) {
    let store: DynEntityStore = Arc::new(MemoryStore::new());
    let mut tx = store.begin().await.unwrap();
    let user = tx
        .insert_user(&NewUser {
            name: "alice".into(),
            display_name: "Alice".into(),
            description: String::new(),
            credential: "hashed".into(),
        })
        .await
        .unwrap();
    tx.insert_theme(user.id, false).await.unwrap();
    tx.commit().await.unwrap();
    (store, user.id)
}

async fn cached_theme(
    registry: &CacheRegistry,
    tx: &mut dyn StoreTransaction,
    user_id: i64,
) -> ThemeRecord {
    registry
        .themes
        .fetch(user_id, tx.theme_by_user_id(user_id))
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn commit_invalidates_recorded_keys() {
    let (store, user_id) = seeded_store().await;
    let registry = Arc::new(CacheRegistry::new());
    let coordinator = InvalidationCoordinator::new(store, registry.clone());

    let mut tx = coordinator.begin().await.unwrap();
    assert!(!cached_theme(&registry, &mut tx, user_id).await.dark_mode);
    tx.commit().await.unwrap();
    assert_eq!(registry.themes.len(), 1);

    let mut tx = coordinator.begin().await.unwrap();
    tx.update_theme(user_id, true).await.unwrap();
    tx.record(Mutation::ThemeUpdated { user_id });
    // Still cached until commit.
    assert_eq!(registry.themes.len(), 1);
    tx.commit().await.unwrap();
    assert!(registry.themes.is_empty());

    let mut tx = coordinator.begin().await.unwrap();
    assert!(cached_theme(&registry, &mut tx, user_id).await.dark_mode);
}

#[tokio::test]
async fn rollback_keeps_cached_entries() {
    let (store, user_id) = seeded_store().await;
    let registry = Arc::new(CacheRegistry::new());
    let coordinator = InvalidationCoordinator::new(store, registry.clone());

    let mut tx = coordinator.begin().await.unwrap();
    cached_theme(&registry, &mut tx, user_id).await;
    tx.update_theme(user_id, true).await.unwrap();
    tx.record(Mutation::ThemeUpdated { user_id });
    tx.rollback().await.unwrap();

    assert_eq!(registry.themes.len(), 1);
    assert_eq!(registry.themes.stats().invalidations, 0);

    let mut tx = coordinator.begin().await.unwrap();
    assert!(!tx.theme_by_user_id(user_id).await.unwrap().unwrap().dark_mode);
}

#[tokio::test]
async fn dropped_transaction_invalidates_nothing() {
    let (store, user_id) = seeded_store().await;
    let sink = Arc::new(RecordingSink::default());
    let coordinator = InvalidationCoordinator::new(store, sink.clone());

    {
        let mut tx = coordinator.begin().await.unwrap();
        tx.update_theme(user_id, true).await.unwrap();
        tx.record(Mutation::ThemeUpdated { user_id });
    }

    assert!(sink.keys.lock().is_empty());
}

#[tokio::test]
async fn failing_sink_does_not_fail_commit() {
    let (store, user_id) = seeded_store().await;
    let sink = Arc::new(RecordingSink {
        keys: Mutex::new(Vec::new()),
        fail: true,
    });
    let coordinator = InvalidationCoordinator::new(store.clone(), sink.clone());

    let mut tx = coordinator.begin().await.unwrap();
    tx.update_theme(user_id, true).await.unwrap();
    tx.record(Mutation::ThemeUpdated { user_id });
    tx.record(Mutation::IconReplaced { user_id });
    tx.commit().await.unwrap();

    assert_eq!(
        *sink.keys.lock(),
        vec![CacheKey::Theme(user_id), CacheKey::IconDigest(user_id)]
    );

    let mut tx = store.begin().await.unwrap();
    assert!(tx.theme_by_user_id(user_id).await.unwrap().unwrap().dark_mode);
}

#[tokio::test]
async fn duplicate_keys_are_invalidated_once() {
    let (store, user_id) = seeded_store().await;
    let sink = Arc::new(RecordingSink::default());
    let coordinator = InvalidationCoordinator::new(store, sink.clone());

    let mut tx = coordinator.begin().await.unwrap();
    tx.record(Mutation::ThemeUpdated { user_id });
    tx.record(Mutation::ThemeUpdated { user_id });
    tx.commit().await.unwrap();

    assert_eq!(*sink.keys.lock(), vec![CacheKey::Theme(user_id)]);
}

#[tokio::test]
async fn touches_reports_pending_keys() {
    let (store, user_id) = seeded_store().await;
    let coordinator = InvalidationCoordinator::new(store, Arc::new(CacheRegistry::new()));

    let mut tx = coordinator.begin().await.unwrap();
    assert!(!tx.touches(&CacheKey::Theme(user_id)));
    tx.record(Mutation::ThemeUpdated { user_id });
    assert!(tx.touches(&CacheKey::Theme(user_id)));
    assert!(!tx.touches(&CacheKey::User(user_id)));
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn boxed_commit_also_invalidates() {
    let (store, user_id) = seeded_store().await;
    let sink = Arc::new(RecordingSink::default());
    let coordinator = InvalidationCoordinator::new(store, sink.clone());

    let mut tx = coordinator.begin().await.unwrap();
    tx.record(Mutation::IconReplaced { user_id });
    let boxed: Box<dyn StoreTransaction> = Box::new(tx);
    boxed.commit().await.unwrap();

    assert_eq!(*sink.keys.lock(), vec![CacheKey::IconDigest(user_id)]);
}
