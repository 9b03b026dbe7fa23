mod common;

use bytes::Bytes;

use livepipe_blob::BlobId;
use livepipe_cache::CacheKey;
use livepipe_repository::{
    CoreError, ErrorKind, LivestreamQuery, ProfileUpdate, ReserveLivestream, ReserveOutcome,
};
use livepipe_storage::{EntityStore, StoreTransaction};

use common::{FALLBACK_IMAGE, HOUR, fixture, new_user, provision, register};

fn reservation(title: &str, tags: Vec<i64>, hour: i64) -> ReserveLivestream {
    ReserveLivestream {
        tags,
        title: title.to_string(),
        description: String::new(),
        playlist_url: "https://media.example/playlist.m3u8".to_string(),
        thumbnail_url: "https://media.example/thumb.jpg".to_string(),
        start_at: hour * HOUR,
        end_at: (hour + 1) * HOUR,
    }
}

#[tokio::test]
async fn cached_user_is_served_without_a_reload() {
    let fx = fixture().await;
    let alice = register(&fx.repo, "alice").await;
    let caches = fx.repo.caches();

    let mut tx = fx.repo.begin().await.unwrap();
    let first = fx.repo.user_by_id(&mut tx, alice.id).await.unwrap().unwrap();
    let second = fx.repo.user_by_id(&mut tx, alice.id).await.unwrap().unwrap();
    tx.commit().await.unwrap();

    assert_eq!(first, second);
    let stats = caches.users.stats();
    assert_eq!(stats.fills, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(caches.users.get(&alice.id).map(|u| u.name), Some("alice".into()));
}

#[tokio::test]
async fn registration_rejects_reserved_and_duplicate_names() {
    let fx = fixture().await;
    register(&fx.repo, "alice").await;

    let mut tx = fx.repo.begin().await.unwrap();
    let err = fx
        .repo
        .register_user(&mut tx, new_user("pipe"), true)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidRequest(_)));

    let err = fx
        .repo
        .register_user(&mut tx, new_user("alice"), true)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn registered_user_view_has_theme_and_fallback_icon() {
    let fx = fixture().await;
    let mut tx = fx.repo.begin().await.unwrap();
    let view = fx
        .repo
        .register_user(&mut tx, new_user("alice"), true)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert!(view.theme.dark_mode);
    assert_eq!(view.icon_hash, BlobId::digest(FALLBACK_IMAGE).to_string());

    let mut tx = fx.repo.begin().await.unwrap();
    let filled = fx.repo.fill_user(&mut tx, view.id).await.unwrap();
    assert_eq!(filled, view);
}

#[tokio::test]
async fn rename_is_visible_through_the_name_path() {
    let fx = fixture().await;
    let alice = register(&fx.repo, "alice").await;

    // Warm both levels of the name lookup.
    let mut tx = fx.repo.begin().await.unwrap();
    assert!(fx.repo.user_by_name(&mut tx, "alice").await.unwrap().is_some());
    tx.commit().await.unwrap();

    let mut tx = fx.repo.begin().await.unwrap();
    let updated = fx
        .repo
        .update_user_profile(
            &mut tx,
            alice.id,
            ProfileUpdate {
                name: Some("alicia".into()),
                ..ProfileUpdate::default()
            },
        )
        .await
        .unwrap();
    // The renaming transaction reads its own write without caching it.
    let seen = fx.repo.user_by_id(&mut tx, alice.id).await.unwrap().unwrap();
    assert_eq!(seen.name, "alicia");
    assert!(fx.repo.caches().users.get(&alice.id).is_some_and(|u| u.name == "alice"));
    tx.commit().await.unwrap();
    assert_eq!(updated.name, "alicia");

    let mut tx = fx.repo.begin().await.unwrap();
    assert!(fx.repo.user_by_name(&mut tx, "alice").await.unwrap().is_none());
    let renamed = fx.repo.user_by_name(&mut tx, "alicia").await.unwrap().unwrap();
    assert_eq!(renamed.id, alice.id);
}

#[tokio::test]
async fn stale_name_entry_is_retried_against_the_store() {
    let fx = fixture().await;
    let alice = register(&fx.repo, "alice").await;
    let caches = fx.repo.caches();

    // Point "bob" at alice's id, as a lost invalidation would.
    let mut tx = fx.repo.begin().await.unwrap();
    caches
        .user_ids_by_name
        .fetch("bob".to_string(), async { Ok::<_, ()>(Some(alice.id)) })
        .await
        .unwrap();
    assert!(fx.repo.user_by_name(&mut tx, "bob").await.unwrap().is_none());
    assert!(caches.user_ids_by_name.get(&"bob".to_string()).is_none());
}

#[tokio::test]
async fn invalidating_the_id_entry_refreshes_the_name_path() {
    let fx = fixture().await;
    let alice = register(&fx.repo, "alice").await;
    let caches = fx.repo.caches();

    let mut tx = fx.repo.begin().await.unwrap();
    let cached = fx.repo.user_by_name(&mut tx, "alice").await.unwrap().unwrap();
    assert_eq!(cached.display_name, "ALICE");
    tx.commit().await.unwrap();

    // Change the row behind the caches' back.
    let mut raw = fx.repo.store().begin().await.unwrap();
    let mut row = raw.user_by_id(alice.id).await.unwrap().unwrap();
    row.display_name = "Alice Liddell".to_string();
    raw.update_user(&row).await.unwrap();
    raw.commit().await.unwrap();

    assert!(caches.invalidate_key(&CacheKey::User(alice.id)));
    assert!(caches.user_ids_by_name.get(&"alice".to_string()).is_some());

    let mut tx = fx.repo.begin().await.unwrap();
    let fresh = fx.repo.user_by_name(&mut tx, "alice").await.unwrap().unwrap();
    assert_eq!(fresh.display_name, "Alice Liddell");
}

#[tokio::test]
async fn rolled_back_registration_is_never_cached() {
    let fx = fixture().await;
    let caches = fx.repo.caches();

    let mut writer = fx.repo.begin().await.unwrap();
    let bob = fx
        .repo
        .register_user(&mut writer, new_user("bob"), false)
        .await
        .unwrap();

    let mut reader = fx.repo.begin().await.unwrap();
    assert!(fx.repo.user_by_name(&mut reader, "bob").await.unwrap().is_none());
    assert!(fx.repo.user_by_id(&mut reader, bob.id).await.unwrap().is_none());
    reader.commit().await.unwrap();

    writer.rollback().await.unwrap();

    let mut tx = fx.repo.begin().await.unwrap();
    assert!(fx.repo.user_by_name(&mut tx, "bob").await.unwrap().is_none());
    assert!(fx.repo.fill_user(&mut tx, bob.id).await.is_err());
    assert!(caches.user_ids_by_name.get(&"bob".to_string()).is_none());
    assert!(caches.users.get(&bob.id).is_none());
}

#[tokio::test]
async fn rolled_back_theme_change_leaves_no_trace_in_the_cache() {
    let fx = fixture().await;
    let alice = register(&fx.repo, "alice").await;

    let mut tx = fx.repo.begin().await.unwrap();
    fx.repo.set_dark_mode(&mut tx, alice.id, true).await.unwrap();
    let inside = fx.repo.theme_by_user_id(&mut tx, alice.id).await.unwrap().unwrap();
    assert!(inside.dark_mode);
    tx.rollback().await.unwrap();

    let mut tx = fx.repo.begin().await.unwrap();
    let after = fx.repo.theme_by_user_id(&mut tx, alice.id).await.unwrap().unwrap();
    assert!(!after.dark_mode);
}

#[tokio::test]
async fn committed_theme_change_is_served_fresh() {
    let fx = fixture().await;
    let alice = register(&fx.repo, "alice").await;

    let mut tx = fx.repo.begin().await.unwrap();
    assert!(!fx.repo.fill_user(&mut tx, alice.id).await.unwrap().theme.dark_mode);
    tx.commit().await.unwrap();

    let mut tx = fx.repo.begin().await.unwrap();
    fx.repo.set_dark_mode(&mut tx, alice.id, true).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = fx.repo.begin().await.unwrap();
    assert!(fx.repo.fill_user(&mut tx, alice.id).await.unwrap().theme.dark_mode);
}

#[tokio::test]
async fn icons_resolve_to_the_fallback_until_replaced() {
    let fx = fixture().await;
    let alice = register(&fx.repo, "alice").await;

    let mut tx = fx.repo.begin().await.unwrap();
    let before = fx.repo.icon_image(&mut tx, "alice").await.unwrap();
    assert!(before.is_fallback);
    assert_eq!(before.data, Bytes::from_static(FALLBACK_IMAGE));
    tx.commit().await.unwrap();

    let image = Bytes::from_static(b"\x89PNG avatar");
    let mut tx = fx.repo.begin().await.unwrap();
    let icon = fx
        .repo
        .replace_icon(&mut tx, alice.id, image.clone())
        .await
        .unwrap();
    tx.commit().await.unwrap();
    assert_eq!(icon.image_digest, BlobId::digest(&image).to_string());

    let mut tx = fx.repo.begin().await.unwrap();
    let after = fx.repo.icon_image(&mut tx, "alice").await.unwrap();
    assert_eq!(after.data, image);
    let view = fx.repo.fill_user(&mut tx, alice.id).await.unwrap();
    assert_eq!(view.icon_hash, icon.image_digest);

    let missing = fx.repo.icon_image(&mut tx, "nobody").await.unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn new_tags_appear_in_the_catalog_after_commit() {
    let fx = fixture().await;

    let mut tx = fx.repo.begin().await.unwrap();
    assert!(fx.repo.tag_catalog(&mut tx).await.unwrap().is_empty());
    let rust = fx.repo.create_tag(&mut tx, "rust").await.unwrap();
    // Own writes are visible before commit.
    assert_eq!(
        fx.repo.tag_by_id(&mut tx, rust.id).await.unwrap(),
        Some(rust.clone())
    );
    tx.commit().await.unwrap();

    let mut tx = fx.repo.begin().await.unwrap();
    assert_eq!(fx.repo.tags_by_name(&mut tx, "rust").await.unwrap(), vec![rust]);
    assert!(fx.repo.tags_by_name(&mut tx, "go").await.unwrap().is_empty());
}

#[tokio::test]
async fn reserving_a_livestream_invalidates_every_affected_list() {
    let fx = fixture().await;
    provision(&fx.repo, 2).await;
    let alice = register(&fx.repo, "alice").await;

    let mut tx = fx.repo.begin().await.unwrap();
    let music = fx.repo.create_tag(&mut tx, "music").await.unwrap();
    let live = fx.repo.create_tag(&mut tx, "live").await.unwrap();
    tx.commit().await.unwrap();

    // Warm the list caches with empty results.
    let mut tx = fx.repo.begin().await.unwrap();
    assert!(fx.repo.user_livestreams(&mut tx, alice.id).await.unwrap().is_empty());
    for tag in [music.id, live.id] {
        assert!(fx.repo.livestream_ids_by_tag_id(&mut tx, tag).await.unwrap().is_empty());
    }
    tx.commit().await.unwrap();

    let mut tx = fx.repo.begin().await.unwrap();
    let outcome = fx
        .repo
        .reserve_livestream(&mut tx, alice.id, reservation("first", vec![music.id, live.id], 1))
        .await
        .unwrap();
    let view = outcome.reserved().unwrap();
    assert_eq!(view.owner.name, "alice");
    assert_eq!(view.tags.len(), 2);
    // Nothing about the new livestream is cached before commit.
    assert!(fx.repo.caches().livestreams.get(&view.id).is_none());
    tx.commit().await.unwrap();

    let mut tx = fx.repo.begin().await.unwrap();
    let mine = fx.repo.user_livestreams(&mut tx, alice.id).await.unwrap();
    assert_eq!(mine, vec![view.clone()]);
    for tag in [music.id, live.id] {
        let ids = fx.repo.livestream_ids_by_tag_id(&mut tx, tag).await.unwrap();
        assert_eq!(&*ids, &[view.id]);
    }
    assert_eq!(fx.repo.livestream_view(&mut tx, view.id).await.unwrap(), view);
}

#[tokio::test]
async fn full_slot_rejects_the_livestream() {
    let fx = fixture().await;
    provision(&fx.repo, 1).await;
    let alice = register(&fx.repo, "alice").await;

    let mut tx = fx.repo.begin().await.unwrap();
    assert!(
        fx.repo
            .reserve_livestream(&mut tx, alice.id, reservation("first", vec![], 2))
            .await
            .unwrap()
            .is_reserved()
    );
    tx.commit().await.unwrap();

    let mut tx = fx.repo.begin().await.unwrap();
    let outcome = fx
        .repo
        .reserve_livestream(&mut tx, alice.id, reservation("second", vec![], 2))
        .await
        .unwrap();
    assert_eq!(outcome, ReserveOutcome::CapacityExceeded);
    tx.rollback().await.unwrap();

    let mut tx = fx.repo.begin().await.unwrap();
    assert_eq!(fx.repo.user_livestreams(&mut tx, alice.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_tags_are_rejected_before_booking() {
    let fx = fixture().await;
    provision(&fx.repo, 1).await;
    let alice = register(&fx.repo, "alice").await;

    let mut tx = fx.repo.begin().await.unwrap();
    let err = fx
        .repo
        .reserve_livestream(&mut tx, alice.id, reservation("tagged", vec![404], 0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    tx.rollback().await.unwrap();
    assert_eq!(fx.memory.reservation_count(), 0);
}

#[tokio::test]
async fn tags_missing_from_the_cached_catalog_leave_it_in_place() {
    let fx = fixture().await;
    provision(&fx.repo, 2).await;
    let alice = register(&fx.repo, "alice").await;
    let caches = fx.repo.caches();

    let mut tx = fx.repo.begin().await.unwrap();
    assert!(fx.repo.tag_catalog(&mut tx).await.unwrap().is_empty());
    tx.commit().await.unwrap();
    let before = caches.tag_catalog.stats();

    // Unknown ids fail without dropping the shared catalog.
    let mut tx = fx.repo.begin().await.unwrap();
    let err = fx
        .repo
        .reserve_livestream(&mut tx, alice.id, reservation("ghost", vec![404], 0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    tx.rollback().await.unwrap();

    // A tag written behind the caches' back is still found.
    let mut raw = fx.repo.store().begin().await.unwrap();
    let go = raw.insert_tag("go").await.unwrap();
    raw.commit().await.unwrap();

    let mut tx = fx.repo.begin().await.unwrap();
    let view = fx
        .repo
        .reserve_livestream(&mut tx, alice.id, reservation("gophers", vec![go.id], 1))
        .await
        .unwrap()
        .reserved()
        .unwrap();
    assert_eq!(view.tags, vec![go]);
    tx.rollback().await.unwrap();

    let after = caches.tag_catalog.stats();
    assert_eq!(after.invalidations, before.invalidations);
    assert_eq!(after.size, 1);
}

#[tokio::test]
async fn search_by_tag_is_newest_first_without_duplicates() {
    let fx = fixture().await;
    provision(&fx.repo, 5).await;
    let alice = register(&fx.repo, "alice").await;
    let bob = register(&fx.repo, "bob").await;

    let mut tx = fx.repo.begin().await.unwrap();
    let rust = fx.repo.create_tag(&mut tx, "rust").await.unwrap();
    let other = fx.repo.create_tag(&mut tx, "other").await.unwrap();
    tx.commit().await.unwrap();

    let mut ids = Vec::new();
    for (owner, tags, hour) in [
        (alice.id, vec![rust.id], 0),
        (bob.id, vec![other.id], 1),
        (alice.id, vec![rust.id, other.id], 2),
    ] {
        let mut tx = fx.repo.begin().await.unwrap();
        let view = fx
            .repo
            .reserve_livestream(&mut tx, owner, reservation("stream", tags, hour))
            .await
            .unwrap()
            .reserved()
            .unwrap();
        tx.commit().await.unwrap();
        ids.push(view.id);
    }

    let mut tx = fx.repo.begin().await.unwrap();
    let by_tag: Vec<i64> = fx
        .repo
        .search_livestreams(&mut tx, LivestreamQuery::ByTag("rust".into()))
        .await
        .unwrap()
        .iter()
        .map(|l| l.id)
        .collect();
    assert_eq!(by_tag, vec![ids[2], ids[0]]);

    let all: Vec<i64> = fx
        .repo
        .search_livestreams(&mut tx, LivestreamQuery::All { limit: Some(2) })
        .await
        .unwrap()
        .iter()
        .map(|l| l.id)
        .collect();
    assert_eq!(all, vec![ids[2], ids[1]]);

    let none = fx
        .repo
        .search_livestreams(&mut tx, LivestreamQuery::ByTag("missing".into()))
        .await
        .unwrap();
    assert!(none.is_empty());

    let bobs = fx.repo.livestreams_of_user_named(&mut tx, "bob").await.unwrap();
    assert_eq!(bobs.len(), 1);
    assert_eq!(bobs[0].tags[0].name, "other");
}

#[tokio::test]
async fn reset_caches_empties_every_cache() {
    let fx = fixture().await;
    let alice = register(&fx.repo, "alice").await;

    let mut tx = fx.repo.begin().await.unwrap();
    fx.repo.fill_user(&mut tx, alice.id).await.unwrap();
    fx.repo.tag_catalog(&mut tx).await.unwrap();
    tx.commit().await.unwrap();
    assert!(fx.repo.caches().total_entries() > 0);

    fx.repo.reset_caches();
    assert_eq!(fx.repo.caches().total_entries(), 0);

    // Reads still work against the store afterwards.
    let mut tx = fx.repo.begin().await.unwrap();
    assert_eq!(fx.repo.fill_user(&mut tx, alice.id).await.unwrap().name, "alice");
    let _ = tx.user_by_id(alice.id).await.unwrap();
}
