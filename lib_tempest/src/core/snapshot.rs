//! # Dashboard Snapshot
//!
//! The presentation-ready aggregate and its two bounded buffers. Only the
//! state aggregator mutates a snapshot; everyone else receives clones.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::lifecycle::ConnectionState;
use crate::models::{ObservationRecord, RapidWindSample, StationMeta, WeatherEvent};

/// Rapid wind samples kept for the sparkline.
pub const WIND_HISTORY_CAPACITY: usize = 20;
/// Weather events kept in the log.
pub const EVENT_LOG_CAPACITY: usize = 10;

/// FIFO ring of the most recent rapid wind samples, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WindHistory {
    samples: VecDeque<RapidWindSample>,
}

impl WindHistory {
    /// Appends a sample, evicting the oldest beyond capacity.
    pub fn push(&mut self, sample: RapidWindSample) {
        self.samples.push_back(sample);
        while self.samples.len() > WIND_HISTORY_CAPACITY {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Oldest to newest, in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &RapidWindSample> + '_ {
        self.samples.iter()
    }

    pub fn latest(&self) -> Option<&RapidWindSample> {
        self.samples.back()
    }
}

/// Most-recent-first log of weather events.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventLog {
    events: VecDeque<WeatherEvent>,
}

impl EventLog {
    /// Prepends an event, truncating the oldest beyond capacity.
    pub fn push(&mut self, event: WeatherEvent) {
        self.events.push_front(event);
        self.events.truncate(EVENT_LOG_CAPACITY);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Newest first.
    pub fn iter(&self) -> impl Iterator<Item = &WeatherEvent> + '_ {
        self.events.iter()
    }

    pub fn latest(&self) -> Option<&WeatherEvent> {
        self.events.front()
    }
}

/// Everything the presentation layer needs for one redraw.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardSnapshot {
    pub station: StationMeta,
    pub observation: Option<ObservationRecord>,
    pub rapid_wind: Option<RapidWindSample>,
    pub wind_history: WindHistory,
    pub events: EventLog,
    pub connection: ConnectionState,
    /// User-visible error text, if any. Observations clear it as well as a
    /// connect; this is the field the status line reads.
    pub error: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
}

impl DashboardSnapshot {
    pub fn new(station: StationMeta) -> Self {
        Self {
            station,
            ..Self::default()
        }
    }

    /// One-line connection/data status, relative to `now`.
    ///
    /// The exhausted state stays visible until the process is restarted.
    pub fn status_line(&self, now: DateTime<Utc>) -> String {
        let mut line = match self.last_update {
            None => "Waiting for data...".to_string(),
            Some(at) => format!("Last updated: {}s ago", (now - at).num_seconds().max(0)),
        };

        if self.connection.is_reconnecting() {
            line.push_str(&format!(
                " (reconnecting {}/{}...)",
                self.connection.attempts, self.connection.max_attempts
            ));
        } else {
            if let Some(error) = &self.error {
                line.push_str(&format!(" | Error: {}", error));
            }
            if self.connection.is_exhausted() {
                line.push_str(" | Reconnect budget exhausted, restart to retry");
            }
        }

        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lifecycle::ConnectionPhase;
    use crate::models::EventCategory;

    fn sample(n: i64) -> RapidWindSample {
        RapidWindSample {
            timestamp: DateTime::from_timestamp(1_700_000_000 + n * 3, 0).unwrap(),
            wind_speed: n as f64,
            wind_direction: 90,
        }
    }

    #[test]
    fn test_wind_history_evicts_oldest() {
        let mut history = WindHistory::default();
        for n in 1..=25 {
            history.push(sample(n));
            assert!(history.len() <= WIND_HISTORY_CAPACITY);
        }
        let speeds: Vec<f64> = history.iter().map(|s| s.wind_speed).collect();
        let expected: Vec<f64> = (6..=25).map(|n| n as f64).collect();
        assert_eq!(speeds, expected);
        assert_eq!(history.latest().map(|s| s.wind_speed), Some(25.0));
    }

    #[test]
    fn test_event_log_newest_first() {
        let mut log = EventLog::default();
        for n in 0..12 {
            log.push(WeatherEvent {
                timestamp: DateTime::from_timestamp(1_700_000_000 + n, 0).unwrap(),
                category: EventCategory::Lightning,
                detail: format!("strike {}", n),
            });
        }
        assert_eq!(log.len(), EVENT_LOG_CAPACITY);
        assert_eq!(log.latest().unwrap().detail, "strike 11");
        let details: Vec<&str> = log.iter().map(|e| e.detail.as_str()).collect();
        assert_eq!(details.last(), Some(&"strike 2"));
    }

    #[test]
    fn test_status_line_variants() {
        let now = DateTime::from_timestamp(1_700_000_100, 0).unwrap();
        let mut snap = DashboardSnapshot::default();
        assert_eq!(snap.status_line(now), "Waiting for data...");

        snap.last_update = Some(DateTime::from_timestamp(1_700_000_088, 0).unwrap());
        assert_eq!(snap.status_line(now), "Last updated: 12s ago");

        snap.error = Some("ws read: connection closed by remote".to_string());
        snap.connection.phase = ConnectionPhase::Reconnecting;
        snap.connection.retry_pending = true;
        snap.connection.attempts = 2;
        assert_eq!(snap.status_line(now), "Last updated: 12s ago (reconnecting 2/5...)");

        snap.connection.retry_pending = false;
        snap.connection.attempts = 5;
        assert_eq!(
            snap.status_line(now),
            "Last updated: 12s ago | Error: ws read: connection closed by remote | Reconnect budget exhausted, restart to retry"
        );
    }
}
