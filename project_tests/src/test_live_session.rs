//! # Live Session Integration Tests
//!
//! Drives the full pipeline (event loop, lifecycle, read task, decoder and
//! aggregator) against the in-memory websocket server from the harness.

use std::time::Duration;

use chrono::DateTime;
use lib_tempest::core::{spawn_live, DashboardSnapshot};
use lib_tempest::{EventCategory, StationMeta};
use project_tests::*;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::timeout;

fn station() -> StationMeta {
    StationMeta {
        device_id: DEVICE_ID,
        station_name: "Harness".to_string(),
        timezone: "UTC".to_string(),
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
async fn subscribes_and_folds_every_frame_kind() {
    let dialer = ScriptedDialer::new([Script::serve(vec![
        ack_frame("tempest-live-obs"),
        obs_frame(1_700_000_000, 21.5),
        rapid_wind_frame(1_700_000_003, 2.5, 270),
        strike_frame(1_700_000_010, 12.0),
        precip_frame(1_700_000_020),
        json!({"type": "device_status", "device_id": DEVICE_ID}).to_string(),
        "not json".to_string(),
    ])]);
    let handle = spawn_live(dialer.clone(), station(), fast_settings());
    let mut rx = handle.subscribe();

    let snap = wait_until(&mut rx, |s| s.events.len() == 2).await;

    assert!(snap.connection.is_connected());
    assert!(snap.error.is_none());
    assert!(snap.last_update.is_some());
    assert_eq!(snap.station.station_name, "Harness");

    let obs = snap.observation.as_ref().expect("observation applied");
    assert_eq!(obs.temperature, 21.5);
    assert_eq!(obs.wind_direction, 180);
    assert_eq!(obs.pressure, 1013.2);

    let rapid = snap.rapid_wind.expect("rapid wind applied");
    assert_eq!(rapid.wind_speed, 2.5);
    assert_eq!(rapid.wind_direction, 270);
    assert_eq!(snap.wind_history.len(), 1);

    let events: Vec<_> = snap.events.iter().collect();
    assert_eq!(events[0].category, EventCategory::PrecipitationStart);
    assert_eq!(events[0].detail, "Rain started");
    assert_eq!(events[1].category, EventCategory::Lightning);
    assert_eq!(events[1].detail, "Lightning 12 km away");

    assert_eq!(
        dialer.requests(),
        vec![
            json!({"type": "listen_start", "device_id": DEVICE_ID, "id": "tempest-live-obs"}),
            json!({"type": "listen_rapid_start", "device_id": DEVICE_ID, "id": "tempest-live-rapid"}),
        ]
    );

    handle.shutdown();
    handle.join().await.unwrap();
}

#[tokio::test]
async fn wind_history_keeps_last_twenty_of_twenty_five() {
    let frames = (1..=25u64)
        .map(|n| rapid_wind_frame(1_700_000_000 + n * 3, n as f64, 90))
        .collect();
    let dialer = ScriptedDialer::new([Script::serve(frames)]);
    let handle = spawn_live(dialer, station(), fast_settings());
    let mut rx = handle.subscribe();

    let snap = wait_until(&mut rx, |s| {
        s.rapid_wind.is_some_and(|r| r.wind_speed == 25.0)
    })
    .await;

    assert_eq!(snap.wind_history.len(), 20);
    let stamps: Vec<_> = snap.wind_history.iter().map(|s| s.timestamp).collect();
    let expected: Vec<_> = (6..=25i64)
        .map(|n| DateTime::from_timestamp(1_700_000_000 + n * 3, 0).unwrap())
        .collect();
    assert_eq!(stamps, expected);

    handle.shutdown();
    handle.join().await.unwrap();
}

#[tokio::test]
async fn three_refused_dials_then_connects_with_fresh_budget() {
    let dialer = ScriptedDialer::new([
        Script::Refuse,
        Script::Refuse,
        Script::Refuse,
        Script::serve(vec![obs_frame(1_700_000_000, 18.0)]),
    ]);
    let handle = spawn_live(dialer.clone(), station(), fast_settings());
    let mut rx = handle.subscribe();

    let snap = wait_until(&mut rx, |s| {
        s.connection.is_connected() && s.observation.is_some()
    })
    .await;

    assert_eq!(dialer.dials(), 4);
    assert_eq!(snap.connection.attempts, 0);
    assert!(snap.connection.last_error.is_none());
    assert!(snap.connection.last_connected_at.is_some());
    assert!(snap.error.is_none());
    assert_eq!(dialer.requests().len(), 2);

    handle.shutdown();
    handle.join().await.unwrap();
}
