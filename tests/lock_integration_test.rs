//! Lock manager integration tests: grant/queue/cascade behavior, FIFO
//! fairness, generation monotonicity, and the acknowledgement barrier.

mod common;

use common::*;

use madrone::error::CoordError;
use madrone::types::{EventMask, LockMode, LockStatus, OpenFlags};

fn granted_generation(notifications: &[madrone::wire::WireNotification]) -> Option<(u32, u64)> {
    notifications
        .iter()
        .find(|n| n.mask == EventMask::LOCK_GRANTED.bits())
        .map(|n| {
            let mode = u32::from_le_bytes(n.payload[..4].try_into().expect("mode"));
            let generation = u64::from_le_bytes(n.payload[4..].try_into().expect("generation"));
            (mode, generation)
        })
}

// ============================================================================
// Grant paths
// ============================================================================

#[tokio::test]
async fn exclusive_then_shared_handoff() {
    // Scenario: s1 holds EXCLUSIVE; s2's SHARED request queues; releasing
    // hands the lock to s2 with a bumped generation.
    let harness = start();
    let s1 = session(&harness, 1);
    let s2 = session(&harness, 2);
    let h1 = open_locker(&harness, s1, "/a");
    let h2 = open_locker(&harness, s2, "/a");

    let (status, g1, _) = harness
        .coordinator
        .lock(s1, h1, LockMode::Exclusive, false)
        .expect("lock");
    assert_eq!(status, LockStatus::Granted);
    assert!(g1 > 0);

    let (status, generation, _) = harness
        .coordinator
        .lock(s2, h2, LockMode::Shared, false)
        .expect("lock");
    assert_eq!(status, LockStatus::Pending);
    assert_eq!(generation, 0);

    let release = spawn_release(&harness, s1, h1);
    settle().await;

    let notifications = peek_notifications(&harness, s2);
    let (mode, g2) = granted_generation(&notifications).expect("grant notification");
    assert_eq!(mode, LockMode::Shared.to_wire());
    assert_eq!(g2, g1 + 1);

    ack_all(&harness, s2);
    release.await.expect("release completes");
}

#[tokio::test]
async fn try_acquire_reports_busy_without_queueing() {
    let harness = start();
    let s1 = session(&harness, 1);
    let s2 = session(&harness, 2);
    let h1 = open_locker(&harness, s1, "/a");
    let h2 = open_locker(&harness, s2, "/a");

    harness
        .coordinator
        .lock(s1, h1, LockMode::Exclusive, false)
        .expect("lock");

    let (status, _, _) = harness
        .coordinator
        .lock(s2, h2, LockMode::Shared, true)
        .expect("try lock");
    assert_eq!(status, LockStatus::Busy);

    // Nothing was queued: the release cascade grants nobody.
    let release = spawn_release(&harness, s1, h1);
    release.await.expect("release completes without grants");

    let (status, _, _) = harness
        .coordinator
        .lock(s2, h2, LockMode::Shared, true)
        .expect("try lock after release");
    assert_eq!(status, LockStatus::Granted);
}

#[tokio::test]
async fn shared_holders_join_without_notification() {
    let harness = start();
    let s1 = session(&harness, 1);
    let s2 = session(&harness, 2);
    let h1 = open_locker(&harness, s1, "/a");
    let h2 = open_locker(&harness, s2, "/a");

    // An observer subscribed to lock events on the same node.
    let observer = session(&harness, 3);
    let (_oh, _, _) = harness
        .coordinator
        .open(
            observer,
            "/a",
            OpenFlags::READ,
            EventMask::LOCK_ACQUIRED | EventMask::LOCK_RELEASED,
        )
        .expect("open observer");

    harness
        .coordinator
        .lock(s1, h1, LockMode::Shared, false)
        .expect("first shared");
    harness
        .coordinator
        .lock(s2, h2, LockMode::Shared, false)
        .expect("second shared");

    // Only the first acquisition changed the observable mode.
    let notifications = peek_notifications(&harness, observer);
    let acquired: Vec<_> = notifications
        .iter()
        .filter(|n| n.mask == EventMask::LOCK_ACQUIRED.bits())
        .collect();
    assert_eq!(acquired.len(), 1);
}

#[tokio::test]
async fn lock_requires_lock_and_write_flags() {
    let harness = start();
    let s1 = session(&harness, 1);

    let (read_only, _, _) = harness
        .coordinator
        .open(s1, "/a", OpenFlags::CREATE | OpenFlags::READ, EventMask::empty())
        .expect("open");
    assert!(matches!(
        harness.coordinator.lock(s1, read_only, LockMode::Shared, false),
        Err(CoordError::ModeRestriction { .. })
    ));

    let (no_write, _, _) = harness
        .coordinator
        .open(s1, "/a", OpenFlags::READ | OpenFlags::LOCK, EventMask::empty())
        .expect("open");
    assert!(matches!(
        harness.coordinator.lock(s1, no_write, LockMode::Shared, false),
        Err(CoordError::ModeRestriction { .. })
    ));
}

#[tokio::test]
async fn double_lock_is_a_conflict() {
    let harness = start();
    let s1 = session(&harness, 1);
    let h1 = open_locker(&harness, s1, "/a");

    harness
        .coordinator
        .lock(s1, h1, LockMode::Shared, false)
        .expect("lock");
    assert!(matches!(
        harness.coordinator.lock(s1, h1, LockMode::Shared, false),
        Err(CoordError::LockConflict { .. })
    ));
}

#[tokio::test]
async fn release_of_unlocked_handle_is_noop() {
    let harness = start();
    let s1 = session(&harness, 1);
    let h1 = open_locker(&harness, s1, "/a");

    let outbox = harness.coordinator.release(s1, h1).expect("release");
    assert!(outbox.is_empty());
}

// ============================================================================
// FIFO fairness
// ============================================================================

#[tokio::test]
async fn writer_is_not_starved_by_late_readers() {
    // Scenario: three SHARED holders; an EXCLUSIVE request queues; a later
    // SHARED request must queue behind it rather than joining the holders,
    // and is granted only after the exclusive holder is done.
    let harness = start();
    let sessions: Vec<_> = (1..=5).map(|n| session(&harness, n)).collect();
    let handles: Vec<_> = sessions
        .iter()
        .map(|&s| open_locker(&harness, s, "/b"))
        .collect();
    let (s1, s2, s3, s4, s5) = (sessions[0], sessions[1], sessions[2], sessions[3], sessions[4]);
    let (h1, h2, h3, h4, h5) = (handles[0], handles[1], handles[2], handles[3], handles[4]);

    for (s, h) in [(s1, h1), (s2, h2), (s3, h3)] {
        let (status, _, _) = harness
            .coordinator
            .lock(s, h, LockMode::Shared, false)
            .expect("shared lock");
        assert_eq!(status, LockStatus::Granted);
    }

    let (status, _, _) = harness
        .coordinator
        .lock(s4, h4, LockMode::Exclusive, false)
        .expect("exclusive request");
    assert_eq!(status, LockStatus::Pending);

    let (status, _, _) = harness
        .coordinator
        .lock(s5, h5, LockMode::Shared, false)
        .expect("late shared request");
    assert_eq!(status, LockStatus::Pending, "late reader must queue behind the writer");

    // First two releases leave holders; no cascade.
    for (s, h) in [(s1, h1), (s2, h2)] {
        spawn_release(&harness, s, h).await.expect("release");
        assert!(peek_notifications(&harness, s4).is_empty());
        assert!(granted_generation(&peek_notifications(&harness, s5)).is_none());
    }

    // Last shared release grants the exclusive request, and only it.
    let release = spawn_release(&harness, s3, h3);
    settle().await;
    let (mode, g_exclusive) =
        granted_generation(&peek_notifications(&harness, s4)).expect("writer granted");
    assert_eq!(mode, LockMode::Exclusive.to_wire());
    assert!(granted_generation(&peek_notifications(&harness, s5)).is_none());
    ack_all(&harness, s4);
    release.await.expect("release completes");

    // The writer's release grants the queued reader.
    let release = spawn_release(&harness, s4, h4);
    settle().await;
    let (mode, g_shared) =
        granted_generation(&peek_notifications(&harness, s5)).expect("reader granted");
    assert_eq!(mode, LockMode::Shared.to_wire());
    assert!(g_shared > g_exclusive, "generations advance with every grant");
    ack_all(&harness, s5);
    release.await.expect("release completes");
}

#[tokio::test]
async fn generations_strictly_increase_across_grants() {
    let harness = start();
    let s1 = session(&harness, 1);
    let h1 = open_locker(&harness, s1, "/c");

    let mut last = 0;
    for _ in 0..5 {
        let (status, generation, _) = harness
            .coordinator
            .lock(s1, h1, LockMode::Exclusive, false)
            .expect("lock");
        assert_eq!(status, LockStatus::Granted);
        assert!(generation > last);
        last = generation;
        harness.coordinator.release(s1, h1).expect("release");
    }
}

// ============================================================================
// Acknowledgement barrier
// ============================================================================

#[tokio::test]
async fn release_waits_for_grant_acknowledgement() {
    let harness = start();
    let s1 = session(&harness, 1);
    let s2 = session(&harness, 2);
    let h1 = open_locker(&harness, s1, "/a");
    let h2 = open_locker(&harness, s2, "/a");

    harness
        .coordinator
        .lock(s1, h1, LockMode::Exclusive, false)
        .expect("lock");
    harness
        .coordinator
        .lock(s2, h2, LockMode::Shared, false)
        .expect("queue");

    let release = spawn_release(&harness, s1, h1);
    settle().await;
    assert!(
        !release.is_finished(),
        "release must block until the granted session acknowledges"
    );

    ack_all(&harness, s2);
    release.await.expect("release completes after ack");
}
