//! # State Aggregator
//!
//! Single-writer reducer folding the merged message stream into a
//! [`DashboardSnapshot`]. It runs only inside the event loop, one message at a
//! time, so the snapshot needs no locking.

use chrono::{DateTime, Utc};

use super::lifecycle::ConnectionState;
use super::snapshot::DashboardSnapshot;
use crate::models::{LiveMessage, StationMeta, TelemetryEvent};

#[derive(Debug)]
pub struct StateAggregator {
    snapshot: DashboardSnapshot,
}

impl StateAggregator {
    pub fn new(station: StationMeta) -> Self {
        Self {
            snapshot: DashboardSnapshot::new(station),
        }
    }

    pub fn snapshot(&self) -> &DashboardSnapshot {
        &self.snapshot
    }

    /// Applies one message. `connection` is the lifecycle state after the
    /// lifecycle manager has already processed the same message.
    pub fn apply(&mut self, msg: &LiveMessage, connection: &ConnectionState, now: DateTime<Utc>) {
        self.snapshot.connection = connection.clone();

        match msg {
            LiveMessage::Connected { .. } => {
                self.snapshot.error = None;
            }
            LiveMessage::Telemetry(event) => self.apply_telemetry(event, now),
            LiveMessage::ConnectionError { message, .. } => {
                self.snapshot.error = Some(message.clone());
            }
            // Lifecycle already decided; ticks only refresh relative times.
            LiveMessage::ReconnectDue | LiveMessage::Tick => {}
        }
    }

    fn apply_telemetry(&mut self, event: &TelemetryEvent, now: DateTime<Utc>) {
        match event {
            TelemetryEvent::Observation(obs) => {
                self.snapshot.observation = Some(obs.clone());
                // A fresh good read resolves the previous error from the data path's view.
                self.snapshot.error = None;
            }
            TelemetryEvent::RapidWind(sample) => {
                self.snapshot.rapid_wind = Some(*sample);
                self.snapshot.wind_history.push(*sample);
            }
            TelemetryEvent::Precipitation(evt) | TelemetryEvent::Lightning(evt) => {
                self.snapshot.events.push(evt.clone());
            }
        }
        self.snapshot.last_update = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::core::lifecycle::ConnectionLifecycle;
    use crate::core::snapshot::{EVENT_LOG_CAPACITY, WIND_HISTORY_CAPACITY};
    use crate::models::{
        ConnectionErrorKind, EventCategory, ObservationRecord, RapidWindSample, WeatherEvent,
    };

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn wind(n: i64) -> LiveMessage {
        LiveMessage::Telemetry(TelemetryEvent::RapidWind(RapidWindSample {
            timestamp: at(n * 3),
            wind_speed: n as f64 / 10.0,
            wind_direction: (n * 10 % 360) as u16,
        }))
    }

    fn strike(n: i64) -> LiveMessage {
        LiveMessage::Telemetry(TelemetryEvent::Lightning(WeatherEvent {
            timestamp: at(n),
            category: EventCategory::Lightning,
            detail: format!("Lightning {} km away", n),
        }))
    }

    fn failure() -> LiveMessage {
        LiveMessage::ConnectionError {
            session: 1,
            kind: ConnectionErrorKind::Transport,
            message: "ws read: connection closed by remote".to_string(),
        }
    }

    #[test]
    fn test_twenty_five_rapid_winds_keep_last_twenty() {
        let mut agg = StateAggregator::new(StationMeta::default());
        let conn = ConnectionState::default();
        for n in 1..=25 {
            agg.apply(&wind(n), &conn, at(n));
            assert_eq!(
                agg.snapshot().wind_history.len(),
                (n as usize).min(WIND_HISTORY_CAPACITY)
            );
        }

        let snap = agg.snapshot();
        let stamps: Vec<DateTime<Utc>> = snap.wind_history.iter().map(|s| s.timestamp).collect();
        let expected: Vec<DateTime<Utc>> = (6..=25).map(|n| at(n * 3)).collect();
        assert_eq!(stamps, expected);
        assert_eq!(snap.rapid_wind.unwrap().timestamp, at(75));
        assert_eq!(snap.last_update, Some(at(25)));
    }

    #[test]
    fn test_event_log_keeps_ten_most_recent() {
        let mut agg = StateAggregator::new(StationMeta::default());
        let conn = ConnectionState::default();
        for n in 1..=13 {
            agg.apply(&strike(n), &conn, at(n));
            let log = &agg.snapshot().events;
            assert_eq!(log.len(), (n as usize).min(EVENT_LOG_CAPACITY));
            assert_eq!(log.latest().unwrap().timestamp, at(n));
        }

        let precip = LiveMessage::Telemetry(TelemetryEvent::Precipitation(WeatherEvent {
            timestamp: at(99),
            category: EventCategory::PrecipitationStart,
            detail: "Rain started".to_string(),
        }));
        agg.apply(&precip, &conn, at(99));
        let log = &agg.snapshot().events;
        assert_eq!(log.len(), EVENT_LOG_CAPACITY);
        assert_eq!(log.latest().unwrap().category, EventCategory::PrecipitationStart);
    }

    #[test]
    fn test_only_observation_and_connect_clear_error() {
        let mut lc = ConnectionLifecycle::default();
        let mut agg = StateAggregator::new(StationMeta::default());
        lc.begin_connect();
        lc.on_connected(at(0));
        lc.on_failure("ws read: connection closed by remote");
        agg.apply(&failure(), lc.state(), at(1));
        assert!(agg.snapshot().error.is_some());
        assert!(!agg.snapshot().connection.is_connected());
        assert!(agg.snapshot().connection.is_reconnecting());

        // Late in-flight messages from the dying session still land.
        agg.apply(&wind(1), lc.state(), at(2));
        agg.apply(&strike(1), lc.state(), at(2));
        assert!(agg.snapshot().error.is_some());
        assert_eq!(agg.snapshot().wind_history.len(), 1);

        let obs = LiveMessage::Telemetry(TelemetryEvent::Observation(ObservationRecord {
            temperature: 21.5,
            ..ObservationRecord::default()
        }));
        agg.apply(&obs, lc.state(), at(3));
        assert!(agg.snapshot().error.is_none());
        assert_eq!(agg.snapshot().observation.as_ref().unwrap().temperature, 21.5);
        assert_eq!(agg.snapshot().last_update, Some(at(3)));

        agg.apply(&failure(), lc.state(), at(4));
        lc.on_reconnect_due();
        lc.on_connected(at(5));
        agg.apply(&LiveMessage::Connected { session: 2 }, lc.state(), at(5));
        assert!(agg.snapshot().error.is_none());
        assert!(agg.snapshot().connection.is_connected());
        assert_eq!(agg.snapshot().connection.attempts, 0);
    }

    #[test]
    fn test_late_observation_clears_display_error_only() {
        let mut lc = ConnectionLifecycle::new(0, Duration::from_secs(5));
        let mut agg = StateAggregator::new(StationMeta::default());
        lc.begin_connect();
        lc.on_connected(at(0));
        lc.on_failure("ws read: connection closed by remote");
        agg.apply(&failure(), lc.state(), at(1));
        assert!(agg.snapshot().connection.is_exhausted());
        assert!(agg.snapshot().status_line(at(1)).contains("| Error: ws read:"));

        let obs = LiveMessage::Telemetry(TelemetryEvent::Observation(ObservationRecord::default()));
        agg.apply(&obs, lc.state(), at(2));

        let snap = agg.snapshot();
        assert!(snap.error.is_none());
        assert_eq!(
            snap.connection.last_error.as_deref(),
            Some("ws read: connection closed by remote")
        );
        assert_eq!(
            snap.status_line(at(2)),
            "Last updated: 0s ago | Reconnect budget exhausted, restart to retry"
        );
    }

    #[test]
    fn test_tick_changes_nothing() {
        let mut agg = StateAggregator::new(StationMeta {
            device_id: 7,
            station_name: "Backyard".to_string(),
            timezone: "UTC".to_string(),
        });
        let conn = ConnectionState::default();
        agg.apply(&wind(1), &conn, at(1));
        let before = agg.snapshot().clone();

        agg.apply(&LiveMessage::Tick, &conn, at(30));
        agg.apply(&LiveMessage::ReconnectDue, &conn, at(31));
        assert_eq!(agg.snapshot(), &before);
    }
}
