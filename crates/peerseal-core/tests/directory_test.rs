//! Integration tests for the peer directory.
//!
//! Verifies lazy coordinator creation, reuse per uid, unknown users, retry
//! after a failed load and shutdown, with envelopes crossing the CBOR codec
//! between devices.

use peerseal_core::{CoordinatorConfig, EncryptedBox, PeerError, Phase};
use peerseal_harness::SimWorld;

#[tokio::test]
async fn directories_exchange_messages_over_the_wire() {
    let world = SimWorld::new(11);
    let alice = world.add_device(1, 100).directory(CoordinatorConfig::default());
    let bob = world.add_device(2, 200).directory(CoordinatorConfig::default());

    let wire = alice.encrypt(2, "hello bob").await.unwrap().encode().unwrap();
    let received = EncryptedBox::decode(&wire).unwrap();
    assert_eq!(bob.decrypt(1, received).await.unwrap(), b"hello bob".to_vec());

    let wire = bob.encrypt(1, "hello alice").await.unwrap().encode().unwrap();
    let received = EncryptedBox::decode(&wire).unwrap();
    assert_eq!(alice.decrypt(2, received).await.unwrap(), b"hello alice".to_vec());
}

#[tokio::test]
async fn coordinators_are_reused_per_peer() {
    let world = SimWorld::new(12);
    let alice_device = world.add_device(1, 100);
    world.add_device(2, 200);
    world.add_device(3, 300);
    let alice = alice_device.directory(CoordinatorConfig::default());

    alice.encrypt(2, "a").await.unwrap();
    alice.encrypt(2, "b").await.unwrap();
    alice.encrypt(3, "c").await.unwrap();

    assert_eq!(alice.peer_count().await, 2);
    assert_eq!(world.key_server().load_count(2), 1);
    assert_eq!(world.key_server().load_count(3), 1);
    assert_eq!(alice.peer(2).await.unwrap().peer_uid(), 2);
}

#[tokio::test]
async fn unknown_peer_is_rejected() {
    let world = SimWorld::new(13);
    let alice = world.add_device(1, 100).directory(CoordinatorConfig::default());

    assert_eq!(alice.encrypt(42, "nobody").await, Err(PeerError::UnknownPeer { peer_uid: 42 }));
    assert_eq!(alice.peer_count().await, 0);
    assert_eq!(alice.own_uid(), 1);
}

#[tokio::test]
async fn failed_load_is_retried_on_next_call() {
    let world = SimWorld::new(16);
    let alice = world.add_device(1, 100).directory(CoordinatorConfig::default());
    let bob = world.add_device(2, 200).directory(CoordinatorConfig::default());
    world.key_server().fail_loads(2);

    let first = alice.encrypt(2, "a").await.unwrap_err();
    assert!(matches!(first, PeerError::KeyGroupLoadFailed { peer_uid: 2, .. }));
    assert!(first.is_transient());

    world.key_server().restore_loads(2);
    let envelope = alice.encrypt(2, "b").await.unwrap();

    assert_eq!(bob.decrypt(1, envelope).await.unwrap(), b"b".to_vec());
    assert_eq!(world.key_server().load_count(2), 2);
    assert_eq!(alice.peer_count().await, 1);
}

#[tokio::test]
async fn stalled_coordinator_is_kept() {
    let world = SimWorld::new(17);
    let alice = world.add_device(1, 100).directory(CoordinatorConfig::stalling());
    world.add_device(2, 200);
    world.key_server().fail_loads(2);

    let first = alice.peer(2).await.unwrap();
    let again = alice.peer(2).await.unwrap();

    assert!(!first.is_closed());
    assert!(!again.is_closed());
    assert_eq!(again.status().await.unwrap().phase, Phase::LoadingKeyGroups);
    assert_eq!(alice.peer_count().await, 1);
}

#[tokio::test]
async fn shutdown_peer_stops_and_forgets_coordinator() {
    let world = SimWorld::new(14);
    let alice = world.add_device(1, 100).directory(CoordinatorConfig::default());
    world.add_device(2, 200);

    let handle = alice.peer(2).await.unwrap();
    handle.encrypt("warm up").await.unwrap();

    assert!(alice.shutdown_peer(2).await);
    assert!(!alice.shutdown_peer(2).await);
    assert_eq!(handle.encrypt("late").await, Err(PeerError::Stopped { peer_uid: 2 }));

    // A fresh coordinator is created on next use
    alice.encrypt(2, "again").await.unwrap();
    assert_eq!(world.key_server().load_count(2), 2);
}

#[tokio::test]
async fn shutdown_all_stops_every_coordinator() {
    let world = SimWorld::new(15);
    let alice = world.add_device(1, 100).directory(CoordinatorConfig::default());
    world.add_device(2, 200);
    world.add_device(3, 300);

    let to_bob = alice.peer(2).await.unwrap();
    let to_carol = alice.peer(3).await.unwrap();

    alice.shutdown_all().await;

    assert_eq!(alice.peer_count().await, 0);
    assert_eq!(to_bob.encrypt("x").await, Err(PeerError::Stopped { peer_uid: 2 }));
    assert_eq!(to_carol.encrypt("x").await, Err(PeerError::Stopped { peer_uid: 3 }));
}
