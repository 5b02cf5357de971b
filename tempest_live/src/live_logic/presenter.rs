//! Plain console consumer of dashboard snapshots.
//!
//! Prints a compact summary whenever the snapshot changes, and the status
//! line on every tick so relative times keep moving.

use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lib_tempest::core::DashboardSnapshot;
use lib_tempest::RapidWindSample;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const SPARK_BLOCKS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

pub fn cardinal(degrees: u16) -> &'static str {
    const POINTS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];
    let idx = (f64::from(degrees) / 45.0).round() as usize % 8;
    POINTS[idx]
}

/// One block per sample, scaled between the window's min and max speed.
pub fn sparkline<'a>(samples: impl Iterator<Item = &'a RapidWindSample>) -> String {
    let speeds: Vec<f64> = samples.map(|s| s.wind_speed).collect();
    if speeds.is_empty() {
        return String::new();
    }
    let min = speeds.iter().copied().fold(f64::INFINITY, f64::min);
    let max = speeds.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let spread = if max - min < 0.1 { 1.0 } else { max - min };
    let top = SPARK_BLOCKS.len() - 1;

    speeds
        .iter()
        .map(|speed| {
            let idx = ((speed - min) / spread * top as f64) as usize;
            SPARK_BLOCKS[idx.min(top)]
        })
        .collect()
}

/// Multi-line summary of everything in the snapshot.
pub fn render(snap: &DashboardSnapshot, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "== {} ({}) device {} ==",
        snap.station.station_name, snap.station.timezone, snap.station.device_id
    );

    match &snap.observation {
        Some(obs) => {
            let _ = writeln!(
                out,
                "{:.1}°C  {:.0}%  {:.0} mb  UV {:.0}  rain today {:.1} mm",
                obs.temperature, obs.humidity, obs.pressure, obs.uv, obs.daily_rain
            );
            let _ = writeln!(
                out,
                "wind {:.1} m/s (lull {:.1}, gust {:.1}) {} {}°",
                obs.wind_avg,
                obs.wind_lull,
                obs.wind_gust,
                cardinal(obs.wind_direction),
                obs.wind_direction
            );
        }
        None => {
            let _ = writeln!(out, "No observation yet");
        }
    }

    if let Some(rapid) = &snap.rapid_wind {
        let _ = writeln!(
            out,
            "rapid wind {:.1} m/s {} {}°  {}",
            rapid.wind_speed,
            cardinal(rapid.wind_direction),
            rapid.wind_direction,
            sparkline(snap.wind_history.iter())
        );
    }

    for event in snap.events.iter() {
        let _ = writeln!(
            out,
            "  {} [{}] {}",
            event.timestamp.format("%H:%M:%S"),
            event.category.label(),
            event.detail
        );
    }

    out.push_str(&snap.status_line(now));
    out
}

/// Runs until `shutdown` is cancelled or the pipeline goes away.
pub async fn run(
    mut snapshots: watch::Receiver<DashboardSnapshot>,
    tick: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snap = snapshots.borrow_and_update().clone();
                println!("{}", render(&snap, Utc::now()));
            }
            _ = ticker.tick() => {
                let line = snapshots.borrow().status_line(Utc::now());
                println!("{}", line);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_tempest::{EventCategory, ObservationRecord, StationMeta, WeatherEvent};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_cardinal_points() {
        assert_eq!(cardinal(0), "N");
        assert_eq!(cardinal(44), "NE");
        assert_eq!(cardinal(180), "S");
        assert_eq!(cardinal(338), "N");
        assert_eq!(cardinal(315), "NW");
        assert_eq!(cardinal(292), "W");
    }

    #[test]
    fn test_sparkline_scales_between_min_and_max() {
        let samples: Vec<RapidWindSample> = [1.0, 4.5, 8.0]
            .iter()
            .map(|&wind_speed| RapidWindSample {
                timestamp: at(0),
                wind_speed,
                wind_direction: 0,
            })
            .collect();
        assert_eq!(sparkline(samples.iter()), "▁▄█");
        assert_eq!(sparkline(samples[..1].iter()), "▁");
        assert_eq!(sparkline(std::iter::empty::<&RapidWindSample>()), "");
    }

    #[test]
    fn test_render_waiting_then_populated() {
        let mut snap = DashboardSnapshot::new(StationMeta {
            device_id: 42,
            station_name: "Backyard".to_string(),
            timezone: "UTC".to_string(),
        });
        let waiting = render(&snap, at(10));
        assert!(waiting.starts_with("== Backyard (UTC) device 42 =="));
        assert!(waiting.contains("No observation yet"));
        assert!(waiting.ends_with("Waiting for data..."));

        snap.observation = Some(ObservationRecord {
            temperature: 21.5,
            humidity: 55.0,
            wind_avg: 3.2,
            wind_direction: 270,
            ..ObservationRecord::default()
        });
        snap.events.push(WeatherEvent {
            timestamp: at(5),
            category: EventCategory::Lightning,
            detail: "Lightning 12 km away".to_string(),
        });
        snap.last_update = Some(at(5));

        let text = render(&snap, at(10));
        assert!(text.contains("21.5°C  55%"));
        assert!(text.contains("wind 3.2 m/s"));
        assert!(text.contains(" W 270°"));
        assert!(text.contains("[lightning] Lightning 12 km away"));
        assert!(text.ends_with("Last updated: 5s ago"));
    }
}
