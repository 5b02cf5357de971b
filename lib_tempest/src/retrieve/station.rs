//! Station metadata lookup via the Tempest REST API.

use anyhow::Context;
use serde::Deserialize;

use super::ky_http::ApiClient;
use crate::models::StationMeta;

/// Device type reported for Tempest sensor units.
pub const TEMPEST_DEVICE_TYPE: &str = "ST";

#[derive(Debug, Deserialize)]
struct StationsResponse {
    #[serde(default)]
    stations: Vec<StationRecord>,
    status: Option<ApiStatus>,
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    status_code: i64,
    #[serde(default)]
    status_message: String,
}

#[derive(Debug, Deserialize)]
struct StationRecord {
    #[serde(default)]
    name: String,
    #[serde(default)]
    public_name: String,
    #[serde(default)]
    timezone: String,
    #[serde(default)]
    devices: Vec<DeviceRecord>,
}

#[derive(Debug, Deserialize)]
struct DeviceRecord {
    device_id: u64,
    #[serde(default)]
    device_type: String,
}

impl StationRecord {
    /// First Tempest unit, else whatever device is listed first.
    fn pick_device(&self) -> Option<&DeviceRecord> {
        self.devices
            .iter()
            .find(|d| d.device_type == TEMPEST_DEVICE_TYPE)
            .or_else(|| self.devices.first())
    }

    fn into_meta(self, station_id: u64) -> anyhow::Result<StationMeta> {
        let device_id = self
            .pick_device()
            .map(|d| d.device_id)
            .with_context(|| format!("Station {} has no devices", station_id))?;

        let station_name = if self.name.is_empty() {
            self.public_name
        } else {
            self.name
        };

        Ok(StationMeta {
            device_id,
            station_name,
            timezone: self.timezone,
        })
    }
}

fn meta_from_response(resp: StationsResponse, station_id: u64) -> anyhow::Result<StationMeta> {
    if let Some(status) = &resp.status {
        if status.status_code != 0 {
            anyhow::bail!(
                "Station {} lookup rejected: {} ({})",
                station_id,
                status.status_message,
                status.status_code
            );
        }
    }

    resp.stations
        .into_iter()
        .next()
        .with_context(|| format!("Station {} not found", station_id))?
        .into_meta(station_id)
}

/// Resolves a station id to the device to subscribe to, plus display metadata.
pub async fn fetch_station_meta(client: &ApiClient, station_id: u64) -> anyhow::Result<StationMeta> {
    let path = format!("stations/{}", station_id);
    let resp = client
        .get::<StationsResponse>(&path)
        .await
        .with_context(|| format!("Failed to fetch metadata for station {}", station_id))?
        .into_data()
        .with_context(|| format!("Metadata request for station {} failed", station_id))?;

    let meta = meta_from_response(resp, station_id)?;
    log::info!(
        "Station {} '{}' resolved to device {} ({}).",
        station_id,
        meta.station_name,
        meta.device_id,
        meta.timezone
    );
    Ok(meta)
}
