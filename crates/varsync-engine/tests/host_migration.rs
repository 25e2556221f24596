//! Host departure, re-election and the sticky host id
#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use common::{eventually, init_tracing, join, join_with, non_negative, peer, settle};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use varsync_engine::{HostChange, Proposal, SyncConfig, ValidationStatus, VarKey};
use varsync_transport::MemoryHub;

/// Validator that blocks long enough for the host to leave mid-validation
fn stalling(p: &Proposal<i64>) -> bool {
    std::thread::sleep(Duration::from_millis(400));
    p.new_value >= 0
}

/// The next host is the smallest remaining id and everyone agrees on it
#[tokio::test]
async fn test_host_departure_elects_next_peer() {
    init_tracing();
    let hub = MemoryHub::new();
    let first = join(&hub, "m").await;
    let b = join(&hub, "b").await;
    let c = join(&hub, "c").await;

    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = changes.clone();
    let _sub = c.session.on_host_changed(move |change| sink.lock().push(change.clone()));

    // The founder keeps the role although "b" sorts first.
    assert_eq!(b.session.host(), Some(peer("m").id));
    assert_eq!(c.session.host(), Some(peer("m").id));

    first.session.leave().await.unwrap();
    eventually("promotion", || b.session.is_host()).await;
    eventually("guest view", || c.session.host() == Some(peer("b").id)).await;
    assert_eq!(
        *changes.lock(),
        vec![HostChange {
            old: Some(peer("m").id),
            new: Some(peer("b").id),
        }]
    );

    // The new host validates from now on.
    c.session.set(&c.score, -1).unwrap();
    eventually("rollback by new host", || {
        c.session.validation_status(&c.score.key()).unwrap() == ValidationStatus::Validated
    })
    .await;
    assert_eq!(c.score.get(), 0);
    c.session.set(&c.score, 21).unwrap();
    eventually("acceptance by new host", || b.score.get() == 21).await;
}

/// A promoted guest accepts the proposal it had pending with the old host
#[tokio::test]
async fn test_promoted_guest_accepts_its_own_pending_write() {
    init_tracing();
    let hub = MemoryHub::new();
    let old_host = join_with(&hub, "a", SyncConfig::testing(), stalling).await;
    let next = join(&hub, "b").await;
    let other = join(&hub, "c").await;

    next.session.set(&next.score, 9).unwrap();
    assert_eq!(
        next.session.validation_status(&next.score.key()).unwrap(),
        ValidationStatus::Pending
    );
    old_host.session.leave().await.unwrap();

    eventually("promotion", || next.session.is_host()).await;
    let key = VarKey::shared("score");
    eventually("pending settled", || {
        next.session.validation_status(&key).unwrap() == ValidationStatus::Validated
            && other.score.get() == 9
            && other.session.validation_status(&key).unwrap() == ValidationStatus::Validated
    })
    .await;
    assert_eq!(next.score.get(), 9);
    assert_eq!(
        next.session.lock_version(&key).unwrap(),
        other.session.lock_version(&key).unwrap()
    );
}

/// A guest with a pending proposal re-proposes it to the new host
#[tokio::test]
async fn test_guest_reproposes_to_new_host() {
    init_tracing();
    let hub = MemoryHub::new();
    let old_host = join_with(&hub, "a", SyncConfig::testing(), stalling).await;
    let next_validated = Arc::new(AtomicBool::new(false));
    let flag = next_validated.clone();
    let next = join_with(&hub, "b", SyncConfig::testing(), move |p: &Proposal<i64>| {
        flag.store(true, Ordering::SeqCst);
        non_negative(p)
    })
    .await;
    next.session.handshake_complete().await.unwrap();
    let proposer = join(&hub, "c").await;

    proposer.session.set(&proposer.score, 6).unwrap();
    // Give the old host time to start validating before it goes away.
    tokio::time::sleep(Duration::from_millis(50)).await;
    old_host.session.leave().await.unwrap();

    let key = VarKey::shared("score");
    eventually("re-proposal accepted", || {
        next.score.get() == 6
            && proposer.session.validation_status(&key).unwrap() == ValidationStatus::Validated
    })
    .await;
    assert!(next_validated.load(Ordering::SeqCst));
    assert_eq!(proposer.score.get(), 6);
}

/// A departed guest's owned slots disappear everywhere
#[tokio::test]
async fn test_departed_peer_slots_are_closed() {
    init_tracing();
    let hub = MemoryHub::new();
    let host = join(&hub, "a").await;
    let guest = join(&hub, "b").await;
    let watcher = join(&hub, "c").await;

    guest.session.set_own(&guest.pos, 3.0).unwrap();
    eventually("slot value", || watcher.pos.get(guest.id()) == Some(3.0)).await;

    let slot_events = Arc::new(Mutex::new(0usize));
    let sink = slot_events.clone();
    let _sub = watcher
        .pos
        .on_slot_changed(guest.id(), move |_| *sink.lock() += 1);

    let gone = guest.id().clone();
    guest.session.leave().await.unwrap();
    eventually("slot closed", || {
        watcher.pos.get(&gone).is_none() && host.pos.get(&gone).is_none()
    })
    .await;
    assert!(host.session.lock_version(&VarKey::owned("pos", gone.clone())).is_err());
    assert_eq!(watcher.pos.values().len(), 2);
    assert_eq!(*slot_events.lock(), 0);

    // Leaving resets the local copies.
    assert_eq!(guest.pos.get(&gone), None);
    assert_eq!(guest.score.get(), 0);
}

/// A new peer with a smaller id does not take over from the sticky host
#[tokio::test]
async fn test_sticky_host_survives_smaller_joiner() {
    init_tracing();
    let hub = MemoryHub::new();
    let host = join(&hub, "m").await;
    let smaller = join(&hub, "a").await;

    assert!(host.session.is_host());
    assert!(!smaller.session.is_host());
    assert_eq!(smaller.session.host(), Some(peer("m").id));
    settle().await;
    assert!(host.session.is_host());
    assert!(host.errors.lock().is_empty());

    // Once the sticky host leaves, the smallest id takes over and becomes
    // sticky in turn.
    host.session.leave().await.unwrap();
    eventually("promotion", || smaller.session.is_host()).await;
    let newcomer = join(&hub, "0").await;
    assert_eq!(newcomer.session.host(), Some(peer("a").id));
    assert!(!newcomer.session.is_host());
}

/// The first host is announced to observers registered before it settles
#[tokio::test]
async fn test_ready_announces_initial_host() {
    init_tracing();
    let hub = MemoryHub::new();
    let _host = join(&hub, "a").await;
    let late = join_with(&hub, "b", SyncConfig::testing(), non_negative).await;

    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = changes.clone();
    let _sub = late
        .session
        .on_host_changed(move |change| sink.lock().push(change.clone()));
    late.session.handshake_complete().await.unwrap();

    assert_eq!(
        *changes.lock(),
        vec![HostChange {
            old: None,
            new: Some(peer("a").id),
        }]
    );
}
