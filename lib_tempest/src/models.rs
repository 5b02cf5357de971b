//! # Domain Models
//!
//! Strongly-typed weather records produced by the frame decoder, the station
//! metadata handed to the core at construction, and the [`LiveMessage`] type
//! that is the only thing ever sent across the task boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Station metadata resolved once before the core starts.
///
/// Immutable for the lifetime of the event loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationMeta {
    /// The Tempest device the websocket subscriptions are issued for.
    pub device_id: u64,
    /// Human readable station name, shown in the dashboard header.
    pub station_name: String,
    /// IANA timezone of the station (e.g. "America/Denver").
    pub timezone: String,
}

/// A point-in-time reading decoded from an `obs_st` frame.
///
/// Replaced wholesale on every new reading.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObservationRecord {
    pub timestamp: DateTime<Utc>,
    /// Wind lull (m/s)
    pub wind_lull: f64,
    /// Wind average (m/s)
    pub wind_avg: f64,
    /// Wind gust (m/s)
    pub wind_gust: f64,
    /// Degrees, 0-359
    pub wind_direction: u16,
    /// Station pressure (mb)
    pub pressure: f64,
    /// Air temperature (C)
    pub temperature: f64,
    /// Relative humidity (%)
    pub humidity: f64,
    /// Illuminance (lux)
    pub illuminance: f64,
    pub uv: f64,
    /// Solar radiation (W/m^2)
    pub solar_radiation: f64,
    /// Rain accumulated over the report interval (mm)
    pub precip_accum: f64,
    /// 0 none, 1 rain, 2 hail, 3 rain + hail
    pub precip_type: u8,
    /// Lightning strike average distance (km)
    pub lightning_distance: f64,
    pub lightning_count: u32,
    /// Battery (volts)
    pub battery: f64,
    /// Local day rain accumulation (mm)
    pub daily_rain: f64,
}

/// One `rapid_wind` sample (3 second cadence upstream).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RapidWindSample {
    pub timestamp: DateTime<Utc>,
    /// Wind speed (m/s)
    pub wind_speed: f64,
    /// Degrees, 0-359
    pub wind_direction: u16,
}

/// The kind of discrete weather event reported by the station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    PrecipitationStart,
    Lightning,
}

impl EventCategory {
    /// Short label used by the presentation layer.
    pub fn label(&self) -> &'static str {
        match self {
            EventCategory::PrecipitationStart => "rain",
            EventCategory::Lightning => "lightning",
        }
    }
}

/// A discrete weather event (rain start, lightning strike).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherEvent {
    pub timestamp: DateTime<Utc>,
    pub category: EventCategory,
    pub detail: String,
}

/// A decoded, complete telemetry message forwarded by the read task.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    Observation(ObservationRecord),
    RapidWind(RapidWindSample),
    Precipitation(WeatherEvent),
    Lightning(WeatherEvent),
}

/// Where a connection failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionErrorKind {
    /// Dial or handshake failure, the session never reached `Connected`.
    Setup,
    /// Read failure, remote close or staleness deadline expiry.
    Transport,
}

/// Every message the event loop consumes, in arrival order, from one channel.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveMessage {
    /// Dial and both subscription requests succeeded.
    Connected { session: u64 },
    /// A decoded frame.
    Telemetry(TelemetryEvent),
    /// The session failed; it has stopped (or is about to stop) and will not send again.
    ConnectionError {
        session: u64,
        kind: ConnectionErrorKind,
        message: String,
    },
    /// A scheduled reconnect delay has elapsed.
    ReconnectDue,
    /// Periodic presentation refresh.
    Tick,
}
