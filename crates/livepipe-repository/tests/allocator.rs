mod common;

use std::sync::Arc;
use std::time::Duration;

use livepipe_repository::{CoreError, ReservationRequest, ReserveOutcome};
use livepipe_storage::{EntityStore, StoreTransaction, TimeWindow};

use common::{HOUR, TERM, fixture, provision, register, slots};

async fn reserve_concurrently(n: usize, capacity: i64) -> (usize, usize, common::Fixture) {
    let fx = fixture().await;
    provision(&fx.repo, capacity).await;
    let user_id = register(&fx.repo, "alice").await.id;
    let window = TimeWindow::new(0, HOUR);

    let handles: Vec<_> = (0..n)
        .map(|_| {
            let repo = Arc::clone(&fx.repo);
            tokio::spawn(async move {
                repo.allocator()
                    .reserve(
                        repo.store().as_ref(),
                        ReservationRequest { user_id, window },
                    )
                    .await
            })
        })
        .collect();

    let (mut reserved, mut rejected) = (0, 0);
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            ReserveOutcome::Reserved(_) => reserved += 1,
            ReserveOutcome::CapacityExceeded => rejected += 1,
        }
    }
    (reserved, rejected, fx)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_never_overbook() {
    let (reserved, rejected, fx) = reserve_concurrently(12, 5).await;
    assert_eq!(reserved, 5);
    assert_eq!(rejected, 7);

    let slot = slots(&fx.repo, TimeWindow::new(0, HOUR)).await[0];
    assert_eq!(slot.remaining, 0);
    assert_eq!(fx.memory.reservation_count(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn capacity_two_three_requests() {
    let (reserved, rejected, fx) = reserve_concurrently(3, 2).await;
    assert_eq!((reserved, rejected), (2, 1));
    assert_eq!(slots(&fx.repo, TimeWindow::new(0, HOUR)).await[0].remaining, 0);
}

#[tokio::test]
async fn multi_slot_booking_decrements_every_intersected_slot() {
    let fx = fixture().await;
    provision(&fx.repo, 3).await;
    let user = register(&fx.repo, "alice").await;

    // Touches the slots [0,1h), [1h,2h) and [2h,3h).
    let window = TimeWindow::new(HOUR / 2, 2 * HOUR + 1);
    let outcome = fx
        .repo
        .allocator()
        .reserve(
            fx.repo.store().as_ref(),
            ReservationRequest {
                user_id: user.id,
                window,
            },
        )
        .await
        .unwrap();
    let admission = outcome.reserved().unwrap();
    assert_eq!(admission.slot_ids.len(), 3);
    assert_eq!(admission.reservation.start_at, window.start_at);

    let after = slots(&fx.repo, TimeWindow::new(0, 4 * HOUR)).await;
    let remaining: Vec<i64> = after.iter().map(|s| s.remaining).collect();
    assert_eq!(remaining, vec![2, 2, 2, 3]);

    // capacity - remaining equals the reservations overlapping each slot
    let mut tx = fx.repo.store().begin().await.unwrap();
    for slot in &after {
        let overlapping = tx.count_reservations_in(slot.window()).await.unwrap();
        assert_eq!(slot.booked(), overlapping);
    }
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn one_full_slot_rejects_the_whole_booking() {
    let fx = fixture().await;
    provision(&fx.repo, 1).await;
    let user = register(&fx.repo, "alice").await;
    let allocator = fx.repo.allocator();
    let store = fx.repo.store().as_ref();

    let first = allocator
        .reserve(
            store,
            ReservationRequest {
                user_id: user.id,
                window: TimeWindow::new(HOUR, 2 * HOUR),
            },
        )
        .await
        .unwrap();
    assert!(first.is_reserved());

    let overlapping = allocator
        .reserve(
            store,
            ReservationRequest {
                user_id: user.id,
                window: TimeWindow::new(0, 3 * HOUR),
            },
        )
        .await
        .unwrap();
    assert_eq!(overlapping, ReserveOutcome::CapacityExceeded);

    // The free neighbours were left untouched.
    let remaining: Vec<i64> = slots(&fx.repo, TimeWindow::new(0, 3 * HOUR))
        .await
        .iter()
        .map(|s| s.remaining)
        .collect();
    assert_eq!(remaining, vec![1, 0, 1]);
    assert_eq!(fx.memory.reservation_count(), 1);
}

#[tokio::test]
async fn invalid_windows_are_rejected() {
    let fx = fixture().await;
    provision(&fx.repo, 1).await;
    let user = register(&fx.repo, "alice").await;
    let store = fx.repo.store().as_ref();

    for window in [
        TimeWindow::new(HOUR, HOUR),
        TimeWindow::new(2 * HOUR, HOUR),
        TimeWindow::new(TERM.end_at, TERM.end_at + HOUR),
        TimeWindow::new(-HOUR, 0),
    ] {
        let result = fx
            .repo
            .allocator()
            .reserve(
                store,
                ReservationRequest {
                    user_id: user.id,
                    window,
                },
            )
            .await;
        assert!(
            matches!(result, Err(CoreError::InvalidRequest(_))),
            "{window} should be rejected"
        );
    }
}

#[tokio::test]
async fn window_without_slots_is_capacity_exceeded() {
    let fx = fixture().await;
    let user = register(&fx.repo, "alice").await;
    let outcome = fx
        .repo
        .allocator()
        .reserve(
            fx.repo.store().as_ref(),
            ReservationRequest {
                user_id: user.id,
                window: TimeWindow::new(0, HOUR),
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome, ReserveOutcome::CapacityExceeded);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disjoint_windows_do_not_block_each_other() {
    let fx = fixture().await;
    provision(&fx.repo, 1).await;
    let user_id = register(&fx.repo, "alice").await.id;
    let allocator = *fx.repo.allocator();

    // Hold the first slot's lock in an open transaction.
    let mut held = fx.repo.store().begin().await.unwrap();
    let outcome = allocator
        .try_reserve(
            held.as_mut(),
            ReservationRequest {
                user_id,
                window: TimeWindow::new(0, HOUR),
            },
        )
        .await
        .unwrap();
    assert!(outcome.is_reserved());

    let repo = Arc::clone(&fx.repo);
    let disjoint = tokio::time::timeout(Duration::from_secs(5), async move {
        allocator
            .reserve(
                repo.store().as_ref(),
                ReservationRequest {
                    user_id,
                    window: TimeWindow::new(5 * HOUR, 6 * HOUR),
                },
            )
            .await
    })
    .await
    .expect("disjoint booking blocked")
    .unwrap();
    assert!(disjoint.is_reserved());

    held.rollback().await.unwrap();
    let first = slots(&fx.repo, TimeWindow::new(0, HOUR)).await[0];
    assert_eq!(first.remaining, 1);
}

#[tokio::test]
async fn provisioning_builds_the_grid() {
    let fx = fixture().await;
    provision(&fx.repo, 4).await;

    let mut tx = fx.repo.store().begin().await.unwrap();
    assert_eq!(tx.slot_count().await.unwrap(), 10);
    let all = tx.slots_in(TERM).await.unwrap();
    tx.rollback().await.unwrap();

    assert!(all.iter().all(|s| s.capacity == 4 && s.remaining == 4));
    assert_eq!(all.first().map(|s| s.start_at), Some(0));
    assert_eq!(all.last().map(|s| s.end_at), Some(TERM.end_at));
}
