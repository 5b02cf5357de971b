//! # Tempest Frame Decoder
//!
//! Pure functions turning raw websocket payloads into typed [`Frame`]s, plus the
//! outbound subscription requests sent during the handshake.
//!
//! Decoding is two-step: a generic envelope carrying only the `type` tag is
//! parsed first, then the type-specific shape. Reading arrays are versioned
//! upstream and may grow, so they are always read by position and a missing
//! position resolves to a default instead of failing.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{
    EventCategory, ObservationRecord, RapidWindSample, TelemetryEvent, WeatherEvent,
};

/// Request id of the `listen_start` subscription.
pub const LISTEN_START_ID: &str = "tempest-live-obs";
/// Request id of the `listen_rapid_start` subscription.
pub const LISTEN_RAPID_START_ID: &str = "tempest-live-rapid";

/// Minimum number of positional fields in a usable `rapid_wind` frame.
pub const RAPID_WIND_MIN_FIELDS: usize = 3;

/// Positions inside the `obs_st` reading array.
///
/// Positions 5 (wind sample interval), 17 (report interval) and 19-21
/// (reserved) are carried upstream but not decoded.
pub mod obs_index {
    pub const TIMESTAMP: usize = 0;
    pub const WIND_LULL: usize = 1;
    pub const WIND_AVG: usize = 2;
    pub const WIND_GUST: usize = 3;
    pub const WIND_DIRECTION: usize = 4;
    pub const PRESSURE: usize = 6;
    pub const TEMPERATURE: usize = 7;
    pub const HUMIDITY: usize = 8;
    pub const ILLUMINANCE: usize = 9;
    pub const UV: usize = 10;
    pub const SOLAR_RADIATION: usize = 11;
    pub const PRECIP_ACCUM: usize = 12;
    pub const PRECIP_TYPE: usize = 13;
    pub const LIGHTNING_DISTANCE: usize = 14;
    pub const LIGHTNING_COUNT: usize = 15;
    pub const BATTERY: usize = 16;
    pub const DAILY_RAIN: usize = 18;
}

/// Why a payload did not produce a frame. Never surfaced past the read task.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("malformed {kind} payload: {source}")]
    Payload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0} frame carried no readings")]
    Empty(&'static str),

    #[error("rapid_wind frame has {0} fields, at least 3 required")]
    InsufficientFields(usize),
}

/// The decoded form of one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Observation(ObservationRecord),
    RapidWind(RapidWindSample),
    PrecipitationEvent(WeatherEvent),
    LightningEvent(WeatherEvent),
    /// Server acknowledgement of one of our subscription requests.
    Acknowledgement { id: String },
    /// A well-formed frame of a type this client does not understand.
    Unrecognized { kind: String },
}

impl Frame {
    /// The telemetry carried by this frame, if it causes a state change at all.
    pub fn into_telemetry(self) -> Option<TelemetryEvent> {
        match self {
            Frame::Observation(obs) => Some(TelemetryEvent::Observation(obs)),
            Frame::RapidWind(wind) => Some(TelemetryEvent::RapidWind(wind)),
            Frame::PrecipitationEvent(evt) => Some(TelemetryEvent::Precipitation(evt)),
            Frame::LightningEvent(evt) => Some(TelemetryEvent::Lightning(evt)),
            Frame::Acknowledgement { .. } | Frame::Unrecognized { .. } => None,
        }
    }
}

/// Outbound subscription request (`listen_start` / `listen_rapid_start`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenRequest {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub device_id: u64,
    pub id: &'static str,
}

impl ListenRequest {
    /// Subscribes to the standard observation stream and events.
    pub fn listen_start(device_id: u64) -> Self {
        Self {
            kind: "listen_start",
            device_id,
            id: LISTEN_START_ID,
        }
    }

    /// Subscribes to the rapid wind stream.
    pub fn listen_rapid_start(device_id: u64) -> Self {
        Self {
            kind: "listen_rapid_start",
            device_id,
            id: LISTEN_RAPID_START_ID,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// --- Wire shapes ---

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct ObsFrame {
    #[serde(default)]
    obs: Vec<Vec<Option<f64>>>,
}

#[derive(Deserialize)]
struct RapidWindFrame {
    #[serde(default)]
    ob: Option<Vec<Option<f64>>>,
}

#[derive(Deserialize)]
struct EventFrame {
    #[serde(default)]
    evt: Option<Vec<Option<f64>>>,
}

#[derive(Deserialize)]
struct AckFrame {
    #[serde(default)]
    id: String,
}

/// Positional view over a reading array; `null` and out-of-range read as absent.
struct Positional<'a>(&'a [Option<f64>]);

impl Positional<'_> {
    fn get(&self, index: usize) -> Option<f64> {
        self.0.get(index).copied().flatten()
    }

    fn value(&self, index: usize) -> f64 {
        self.get(index).unwrap_or(0.0)
    }

    fn timestamp(&self, index: usize) -> DateTime<Utc> {
        epoch_to_utc(self.value(index))
    }
}

/// Unix seconds to UTC; out-of-range values become the zero time.
fn epoch_to_utc(secs: f64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs as i64, 0).unwrap_or_default()
}

/// Decodes an `obs_st` reading array by position.
pub fn parse_observation(obs: &[Option<f64>]) -> ObservationRecord {
    use obs_index::*;
    let p = Positional(obs);
    ObservationRecord {
        timestamp: p.timestamp(TIMESTAMP),
        wind_lull: p.value(WIND_LULL),
        wind_avg: p.value(WIND_AVG),
        wind_gust: p.value(WIND_GUST),
        wind_direction: p.value(WIND_DIRECTION) as u16,
        pressure: p.value(PRESSURE),
        temperature: p.value(TEMPERATURE),
        humidity: p.value(HUMIDITY),
        illuminance: p.value(ILLUMINANCE),
        uv: p.value(UV),
        solar_radiation: p.value(SOLAR_RADIATION),
        precip_accum: p.value(PRECIP_ACCUM),
        precip_type: p.value(PRECIP_TYPE) as u8,
        lightning_distance: p.value(LIGHTNING_DISTANCE),
        lightning_count: p.value(LIGHTNING_COUNT) as u32,
        battery: p.value(BATTERY),
        daily_rain: p.value(DAILY_RAIN),
    }
}

/// Decodes a `rapid_wind` array: `[timestamp, speed m/s, direction deg]`.
pub fn parse_rapid_wind(ob: &[Option<f64>]) -> Result<RapidWindSample, DecodeError> {
    if ob.len() < RAPID_WIND_MIN_FIELDS {
        return Err(DecodeError::InsufficientFields(ob.len()));
    }
    let p = Positional(ob);
    Ok(RapidWindSample {
        timestamp: p.timestamp(0),
        wind_speed: p.value(1),
        wind_direction: p.value(2) as u16,
    })
}

fn parse_precip(evt: &[Option<f64>], now: DateTime<Utc>) -> WeatherEvent {
    let p = Positional(evt);
    WeatherEvent {
        timestamp: p.get(0).map(epoch_to_utc).unwrap_or(now),
        category: EventCategory::PrecipitationStart,
        detail: "Rain started".to_string(),
    }
}

/// `evt_strike`: `[timestamp, distance km, energy]`.
fn parse_strike(evt: &[Option<f64>], now: DateTime<Utc>) -> WeatherEvent {
    let p = Positional(evt);
    let detail = match p.get(1) {
        Some(distance) => format!("Lightning {:.0} km away", distance),
        None => "Lightning detected".to_string(),
    };
    WeatherEvent {
        timestamp: p.get(0).map(epoch_to_utc).unwrap_or(now),
        category: EventCategory::Lightning,
        detail,
    }
}

fn payload<T: DeserializeOwned>(raw: &[u8], kind: &'static str) -> Result<T, DecodeError> {
    serde_json::from_slice(raw).map_err(|source| DecodeError::Payload { kind, source })
}

/// Decodes one raw websocket payload.
///
/// `now` stands in for event timestamps the station did not send.
pub fn decode_frame(raw: &[u8], now: DateTime<Utc>) -> Result<Frame, DecodeError> {
    let envelope: Envelope = serde_json::from_slice(raw).map_err(DecodeError::Envelope)?;

    match envelope.kind.as_str() {
        "obs_st" => {
            let frame: ObsFrame = payload(raw, "obs_st")?;
            let first = frame.obs.first().ok_or(DecodeError::Empty("obs_st"))?;
            Ok(Frame::Observation(parse_observation(first)))
        }
        "rapid_wind" => {
            let frame: RapidWindFrame = payload(raw, "rapid_wind")?;
            let ob = frame.ob.unwrap_or_default();
            Ok(Frame::RapidWind(parse_rapid_wind(&ob)?))
        }
        "evt_precip" => {
            let frame: EventFrame = payload(raw, "evt_precip")?;
            let evt = frame.evt.unwrap_or_default();
            Ok(Frame::PrecipitationEvent(parse_precip(&evt, now)))
        }
        "evt_strike" => {
            let frame: EventFrame = payload(raw, "evt_strike")?;
            let evt = frame.evt.unwrap_or_default();
            Ok(Frame::LightningEvent(parse_strike(&evt, now)))
        }
        "ack" => {
            let frame: AckFrame = payload(raw, "ack")?;
            Ok(Frame::Acknowledgement { id: frame.id })
        }
        other => Ok(Frame::Unrecognized {
            kind: other.to_string(),
        }),
    }
}
