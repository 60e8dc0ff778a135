//! Establishment race scenarios against the in-memory radio

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};

use tether_core::{
    ConnectBehavior, ListenBehavior, MockAir, MockRadio, PeerAddress, PeerInfo, RadioAdapter,
    ServiceId,
};
use tether_transport::{ConnectionService, EstablishError, RaceConfig, RaceOutcome};

const ALICE: &str = "AA:AA:AA:AA:AA:AA";
const BOB: &str = "BB:BB:BB:BB:BB:BB";

fn devices() -> (Arc<MockAir>, Arc<MockRadio>, Arc<MockRadio>) {
    let air = MockAir::new();
    let alice = air.radio(PeerInfo::named(ALICE, "Alice"));
    let bob = air.radio(PeerInfo::named(BOB, "Bob"));
    (air, alice, bob)
}

fn service_for(radio: &Arc<MockRadio>, config: RaceConfig) -> ConnectionService {
    let adapter: Arc<dyn RadioAdapter> = radio.clone();
    ConnectionService::new(adapter, config)
}

/// Let spawned race tasks run up to their next timer
async fn settle() {
    sleep(Duration::from_millis(10)).await;
}

fn assert_in_window(elapsed: Duration, expected: Duration) {
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(100),
        "elapsed {elapsed:?}, expected about {expected:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn test_listener_wins_and_cancels_hanging_initiator() {
    let (_air, alice, bob) = devices();
    alice.set_connect_behavior(ConnectBehavior::Hang);
    let service = service_for(&alice, RaceConfig::default());

    let ticket = service.start_race(Some(BOB.into()));
    sleep(Duration::from_secs(1)).await;
    assert_eq!(alice.stats().pending_connects(), 1);

    let _outbound = bob
        .connect(&PeerAddress::from(ALICE), &ServiceId::default())
        .await
        .unwrap();

    match ticket.outcome().await {
        Some(RaceOutcome::Established { link, was_listener }) => {
            assert!(was_listener);
            assert_eq!(link.remote().address, PeerAddress::from(BOB));
        }
        other => panic!("expected an established link, got {other:?}"),
    }

    assert_eq!(alice.stats().pending_connects(), 0);
    assert_eq!(alice.stats().open_listen_handles(), 0);
    assert!(service.is_connected());
    let winner = service.winner().unwrap();
    assert!(winner.was_listener);
    assert_eq!(winner.peer.display_name(), "Bob");
}

#[tokio::test(start_paused = true)]
async fn test_initiator_wins_and_closes_listen_handle() {
    let (air, alice, bob) = devices();
    let service = service_for(&alice, RaceConfig::default());
    let mut bob_handle = bob.listen(&ServiceId::default()).await.unwrap();

    let ticket = service.start_race(Some(BOB.into()));
    let outcome = ticket.outcome().await;
    let inbound = bob_handle.accept().await.unwrap();

    match outcome {
        Some(RaceOutcome::Established { link, was_listener }) => {
            assert!(!was_listener);
            assert_eq!(link.remote().address, PeerAddress::from(BOB));
        }
        other => panic!("expected an established link, got {other:?}"),
    }
    assert_eq!(inbound.remote().address, PeerAddress::from(ALICE));

    assert_eq!(alice.stats().connect_calls(), 1);
    assert_eq!(alice.stats().listen_handles_closed(), 1);
    assert_eq!(alice.stats().open_listen_handles(), 0);
    assert!(!air.is_listening(&PeerAddress::from(ALICE), &ServiceId::default()));
}

#[tokio::test(start_paused = true)]
async fn test_targeted_race_times_out_after_max_retries() {
    let (_air, alice, _bob) = devices();
    alice.set_connect_behavior(ConnectBehavior::Hang);
    let service = service_for(&alice, RaceConfig::default());

    let started = Instant::now();
    let outcome = service.start_race(Some(BOB.into())).outcome().await;
    let elapsed = started.elapsed();

    match outcome {
        Some(RaceOutcome::Failed(e)) => {
            assert_eq!(e, EstablishError::Timeout { attempts: 5 });
            assert_eq!(e.to_string(), "Connection timeout after 5 attempts");
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert_in_window(elapsed, Duration::from_secs(75));

    assert_eq!(alice.stats().listen_calls(), 5);
    assert_eq!(alice.stats().connect_calls(), 5);
    assert_eq!(alice.stats().pending_connects(), 0);
    assert_eq!(alice.stats().open_listen_handles(), 0);
    assert!(!service.is_racing());
    assert!(!service.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_server_only_race_relistens_after_cooldown() {
    let (_air, alice, _bob) = devices();
    let service = service_for(&alice, RaceConfig::default());

    let ticket = service.start_race(None);
    assert!(ticket.target().is_none());

    // Five attempts end at 83s, the cooldown re-arms the sixth at 88s
    sleep(Duration::from_secs(100)).await;
    assert_eq!(alice.stats().listen_calls(), 6);
    assert_eq!(alice.stats().connect_calls(), 0);
    assert!(service.is_racing());

    service.stop();
    settle().await;
    assert_eq!(alice.stats().open_listen_handles(), 0);
    assert!(ticket.outcome().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_permission_denial_is_not_retried() {
    let (_air, alice, _bob) = devices();
    alice.set_listen_behavior(ListenBehavior::Deny);
    let service = service_for(&alice, RaceConfig::default());

    let started = Instant::now();
    let outcome = service.start_race(Some(BOB.into())).outcome().await;

    // Bob is not listening, so the initiator exhausts its five refused dials
    assert!(matches!(
        outcome,
        Some(RaceOutcome::Failed(EstablishError::PermissionDenied(_)))
    ));
    assert_eq!(alice.stats().listen_calls(), 1);
    assert_eq!(alice.stats().connect_calls(), 5);
    assert_in_window(started.elapsed(), Duration::from_millis(8_500));
}

#[tokio::test(start_paused = true)]
async fn test_disabled_adapter_fails_without_attempts() {
    let (_air, alice, _bob) = devices();
    alice.set_enabled(false);
    let service = service_for(&alice, RaceConfig::default());

    let outcome = service.start_race(Some(BOB.into())).outcome().await;

    assert!(matches!(
        outcome,
        Some(RaceOutcome::Failed(EstablishError::AdapterUnavailable))
    ));
    assert_eq!(alice.stats().listen_calls(), 0);
    assert_eq!(alice.stats().connect_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_both_roles_exhausted() {
    let (_air, alice, _bob) = devices();
    alice.set_listen_behavior(ListenBehavior::Fail);
    alice.set_connect_behavior(ConnectBehavior::Fail);
    let service = service_for(&alice, RaceConfig::default());

    let started = Instant::now();
    let outcome = service.start_race(Some(BOB.into())).outcome().await;

    match outcome {
        Some(RaceOutcome::Failed(e)) => {
            assert_eq!(e, EstablishError::Exhausted);
            assert_eq!(
                e.to_string(),
                "Unable to establish connection in both server and client modes"
            );
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
    assert_in_window(started.elapsed(), Duration::from_millis(8_500));
    assert_eq!(alice.stats().listen_calls(), 5);
    assert_eq!(alice.stats().connect_calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent_and_not_a_failure() {
    let (_air, alice, _bob) = devices();
    alice.set_connect_behavior(ConnectBehavior::Hang);
    let service = service_for(&alice, RaceConfig::default());

    let ticket = service.start_race(Some(BOB.into()));
    sleep(Duration::from_secs(1)).await;
    assert!(service.is_racing());

    service.stop();
    service.stop();
    settle().await;

    assert!(ticket.outcome().await.is_none());
    assert!(!service.is_racing());
    assert_eq!(alice.stats().pending_connects(), 0);
    assert_eq!(alice.stats().open_listen_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_new_race_replaces_running_race() {
    let (_air, alice, bob) = devices();
    alice.set_connect_behavior(ConnectBehavior::Hang);
    let service = service_for(&alice, RaceConfig::default());

    let first = service.start_race(Some(BOB.into()));
    sleep(Duration::from_secs(1)).await;
    let second = service.start_race(None);
    assert!(!service.is_current(first.id()));
    assert!(service.is_current(second.id()));

    assert!(first.outcome().await.is_none());
    settle().await;
    assert_eq!(alice.stats().pending_connects(), 0);
    assert_eq!(alice.stats().open_listen_handles(), 1);

    let _outbound = bob
        .connect(&PeerAddress::from(ALICE), &ServiceId::default())
        .await
        .unwrap();
    assert!(matches!(
        second.outcome().await,
        Some(RaceOutcome::Established { was_listener: true, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_simultaneous_success_yields_one_link() {
    let (_air, alice, _bob) = devices();
    alice.set_listen_behavior(ListenBehavior::Instant);
    alice.set_connect_behavior(ConnectBehavior::Instant);
    let config = RaceConfig::default().with_initiator_startup_delay(Duration::ZERO);
    let service = service_for(&alice, config);

    let outcome = service.start_race(Some(BOB.into())).outcome().await;
    assert!(matches!(outcome, Some(RaceOutcome::Established { .. })));
    assert_eq!(alice.stats().links_opened(), 1);
    assert_eq!(alice.stats().live_links(), 1);

    drop(outcome);
    assert_eq!(alice.stats().live_links(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_idle_start_never_preempts() {
    let (_air, alice, _bob) = devices();
    alice.set_connect_behavior(ConnectBehavior::Hang);
    let service = service_for(&alice, RaceConfig::default());

    let foreground = service.start_race(Some(BOB.into()));
    assert!(service.start_race_if_idle().is_none());
    assert!(service.is_current(foreground.id()));

    service.stop();
    let background = service.start_race_if_idle().unwrap();
    assert!(background.target().is_none());
}
