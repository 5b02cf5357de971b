//! # Reconnect and Shutdown Integration Tests
//!
//! Staleness detection, remote close, the bounded reconnect budget and
//! deliberate shutdown, each against the in-memory websocket server.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lib_tempest::core::{spawn_live, ConnectionPhase, DashboardSnapshot, LiveSettings};
use lib_tempest::ingestors::WssDialer;
use lib_tempest::StationMeta;
use project_tests::*;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

fn station() -> StationMeta {
    StationMeta {
        device_id: DEVICE_ID,
        ..StationMeta::default()
    }
}

async fn wait_until(
    rx: &mut watch::Receiver<DashboardSnapshot>,
    pred: impl FnMut(&DashboardSnapshot) -> bool,
) -> DashboardSnapshot {
    timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .expect("condition reached in time")
        .expect("pipeline still running")
        .clone()
}

#[tokio::test]
async fn silent_socket_goes_stale_and_reconnects() {
    let dialer = ScriptedDialer::new([
        Script::silent(),
        Script::serve(vec![obs_frame(1_700_000_000, 12.0)]),
    ]);
    let settings = LiveSettings {
        staleness: Duration::from_millis(300),
        reconnect_delay: Duration::from_millis(300),
        ..fast_settings()
    };
    let handle = spawn_live(dialer.clone(), station(), settings);
    let mut rx = handle.subscribe();

    let stale = wait_until(&mut rx, |s| s.connection.is_reconnecting()).await;
    assert!(stale.error.as_deref().unwrap().contains("no frame received"));
    assert_eq!(stale.connection.attempts, 1);
    assert!(stale.status_line(Utc::now()).contains("(reconnecting 1/5...)"));

    let recovered = wait_until(&mut rx, |s| s.observation.is_some()).await;
    assert!(recovered.connection.is_connected());
    assert_eq!(recovered.connection.attempts, 0);
    assert!(recovered.error.is_none());
    assert_eq!(dialer.dials(), 2);
    assert_eq!(dialer.requests().len(), 4);

    handle.shutdown();
    handle.join().await.unwrap();
}

#[tokio::test]
async fn remote_close_is_a_transport_failure() {
    let dialer = ScriptedDialer::new([
        Script::close_after(vec![obs_frame(1_700_000_000, 10.0)]),
        Script::serve(vec![obs_frame(1_700_000_060, 30.0)]),
    ]);
    let handle = spawn_live(dialer.clone(), station(), fast_settings());
    let mut rx = handle.subscribe();

    let snap = wait_until(&mut rx, |s| {
        s.connection.is_connected()
            && s.observation.as_ref().is_some_and(|o| o.temperature == 30.0)
    })
    .await;

    assert_eq!(dialer.dials(), 2);
    assert_eq!(snap.connection.attempts, 0);

    handle.shutdown();
    handle.join().await.unwrap();
}

#[tokio::test]
async fn budget_exhausts_and_stays_down() {
    let dialer = ScriptedDialer::new(Vec::<Script>::new());
    let settings = LiveSettings {
        max_attempts: 3,
        ..fast_settings()
    };
    let handle = spawn_live(dialer.clone(), station(), settings);
    let mut rx = handle.subscribe();

    let snap = wait_until(&mut rx, |s| s.connection.is_exhausted()).await;
    assert_eq!(snap.connection.attempts, 3);
    assert!(snap.error.as_deref().unwrap().starts_with("ws dial:"));
    assert!(snap
        .status_line(Utc::now())
        .ends_with("| Reconnect budget exhausted, restart to retry"));

    // No automatic retries once exhausted.
    sleep(Duration::from_millis(200)).await;
    assert_eq!(dialer.dials(), 4);
    assert!(handle.snapshot().connection.is_exhausted());

    handle.shutdown();
    handle.join().await.unwrap();
}

#[tokio::test]
async fn shutdown_closes_socket_and_is_idempotent() {
    let dialer = ScriptedDialer::new([Script::serve(vec![obs_frame(1_700_000_000, 20.0)])]);
    let handle = spawn_live(dialer.clone(), station(), fast_settings());
    let mut rx = handle.subscribe();

    wait_until(&mut rx, |s| s.observation.is_some()).await;

    handle.shutdown();
    handle.shutdown();
    let last = handle.subscribe();
    timeout(Duration::from_secs(3), handle.join())
        .await
        .expect("loop stops promptly")
        .unwrap();

    assert_eq!(last.borrow().connection.phase, ConnectionPhase::Terminated);
    assert!(last.borrow().error.is_none());

    let mut waited = Duration::ZERO;
    while !dialer.client_closed() && waited < Duration::from_secs(2) {
        sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }
    assert!(dialer.client_closed());
    assert_eq!(dialer.dials(), 1);
}

#[tokio::test]
async fn shutdown_during_backoff_cancels_the_timer() {
    let dialer = ScriptedDialer::new([Script::Refuse]);
    let settings = LiveSettings {
        reconnect_delay: Duration::from_secs(30),
        ..fast_settings()
    };
    let handle = spawn_live(dialer.clone(), station(), settings);
    let mut rx = handle.subscribe();

    wait_until(&mut rx, |s| s.connection.is_reconnecting()).await;
    handle.shutdown();
    timeout(Duration::from_secs(2), handle.join())
        .await
        .expect("no wait on the pending retry")
        .unwrap();

    assert_eq!(dialer.dials(), 1);
}

#[tokio::test]
async fn failed_subscription_send_is_a_setup_failure() {
    let dialer = ScriptedDialer::new([Script::DropAfterAccept]);
    let settings = LiveSettings {
        reconnect_delay: Duration::from_secs(30),
        ..fast_settings()
    };
    let handle = spawn_live(dialer.clone(), station(), settings);
    let mut rx = handle.subscribe();

    let mut seen_connected = false;
    let snap = wait_until(&mut rx, |s| {
        seen_connected |= s.connection.is_connected();
        s.connection.is_reconnecting()
    })
    .await;

    assert!(!seen_connected);
    assert!(snap.connection.last_connected_at.is_none());
    assert_eq!(snap.connection.attempts, 1);
    assert!(snap.connection.retry_pending);
    assert!(snap.error.as_deref().unwrap().starts_with("ws listen_"));
    assert!(snap.observation.is_none());

    sleep(Duration::from_millis(100)).await;
    assert_eq!(dialer.dials(), 1);
    assert!(dialer.requests().is_empty());

    handle.shutdown();
    handle.join().await.unwrap();
}

#[tokio::test]
async fn unanswered_upgrade_times_out_into_reconnect() {
    // Accepts TCP connections and never writes a byte back.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let dialer = Arc::new(WssDialer::new(&format!("ws://127.0.0.1:{port}/swd/data"), "t").unwrap());
    let settings = LiveSettings {
        handshake_timeout: Duration::from_millis(200),
        reconnect_delay: Duration::from_secs(30),
        ..fast_settings()
    };
    let handle = spawn_live(dialer, station(), settings);
    let mut rx = handle.subscribe();

    let snap = wait_until(&mut rx, |s| s.connection.is_reconnecting()).await;
    assert_eq!(snap.connection.attempts, 1);
    assert!(snap.connection.last_connected_at.is_none());
    assert_eq!(
        snap.error.as_deref(),
        Some("ws dial: no handshake within 200ms")
    );
    assert!(snap.status_line(Utc::now()).contains("(reconnecting 1/5...)"));

    handle.shutdown();
    timeout(Duration::from_secs(2), handle.join())
        .await
        .expect("loop stops promptly")
        .unwrap();
    server.abort();
}
