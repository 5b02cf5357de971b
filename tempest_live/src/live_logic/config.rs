use anyhow::{Context, Result};
use clap::Parser;
use lib_tempest::core::LiveSettings;
use lib_tempest::ingestors::tempest_wss::DEFAULT_WSS_URL;
use lib_tempest::retrieve::DEFAULT_API_URL;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "tempest_live.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Live Tempest weather station console", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "TEMPEST_TOKEN", hide_env_values = true, help = "Tempest API token.")]
    pub token: Option<String>,

    #[clap(long, env = "TEMPEST_STATION_ID", help = "Station id to resolve into a device via the REST API.")]
    pub station_id: Option<u64>,

    #[clap(long, env = "TEMPEST_DEVICE_ID", help = "Device id to subscribe to; skips the station lookup when given alone.")]
    pub device_id: Option<u64>,

    #[clap(long, env = "TEMPEST_WS_URL", help = "Tempest websocket endpoint.")]
    pub ws_url: Option<String>,

    #[clap(long, env = "TEMPEST_API_URL", help = "Tempest REST base URL.")]
    pub api_url: Option<String>,

    #[clap(long, env = "TEMPEST_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "TEMPEST_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "TEMPEST_LOG_LEVEL", help = "Logging level (debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "TEMPEST_RECONNECT_DELAY_SECONDS", help = "Seconds to wait before each reconnect attempt.")]
    pub reconnect_delay_seconds: Option<u64>,

    #[clap(long, env = "TEMPEST_MAX_RECONNECT_ATTEMPTS", help = "Reconnect attempts before giving up.")]
    pub max_reconnect_attempts: Option<u32>,

    #[clap(long, env = "TEMPEST_STALENESS_SECONDS", help = "Seconds without any frame before the connection is considered dead.")]
    pub staleness_seconds: Option<u64>,

    #[clap(long, env = "TEMPEST_HANDSHAKE_TIMEOUT_SECONDS", help = "Seconds allowed for dialing and subscribing before the attempt counts as failed.")]
    pub handshake_timeout_seconds: Option<u64>,

    #[clap(long, env = "TEMPEST_TICK_MILLIS", help = "Refresh interval for the status line in milliseconds.")]
    pub tick_millis: Option<u64>,
}

/// Where the file layer came from, reported once logging is up.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    Loaded(PathBuf),
    Missing(PathBuf),
    Invalid(PathBuf, String),
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            token: other.token.or(self.token),
            station_id: other.station_id.or(self.station_id),
            device_id: other.device_id.or(self.device_id),
            ws_url: other.ws_url.or(self.ws_url),
            api_url: other.api_url.or(self.api_url),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            reconnect_delay_seconds: other.reconnect_delay_seconds.or(self.reconnect_delay_seconds),
            max_reconnect_attempts: other.max_reconnect_attempts.or(self.max_reconnect_attempts),
            staleness_seconds: other.staleness_seconds.or(self.staleness_seconds),
            handshake_timeout_seconds: other.handshake_timeout_seconds.or(self.handshake_timeout_seconds),
            tick_millis: other.tick_millis.or(self.tick_millis),
        }
    }

    fn defaults() -> Config {
        let live = LiveSettings::default();
        Config {
            ws_url: Some(DEFAULT_WSS_URL.to_string()),
            api_url: Some(DEFAULT_API_URL.to_string()),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            reconnect_delay_seconds: Some(live.reconnect_delay.as_secs()),
            max_reconnect_attempts: Some(live.max_attempts),
            staleness_seconds: Some(live.staleness.as_secs()),
            handshake_timeout_seconds: Some(live.handshake_timeout.as_secs()),
            tick_millis: Some(live.tick_interval.as_millis() as u64),
            ..Default::default()
        }
    }

    /// The API token. Nothing works without one.
    pub fn token(&self) -> Result<&str> {
        match self.token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(token),
            _ => anyhow::bail!("No API token configured; set TEMPEST_TOKEN or pass --token"),
        }
    }

    pub fn ws_url(&self) -> &str {
        self.ws_url.as_deref().unwrap_or(DEFAULT_WSS_URL)
    }

    pub fn api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or(DEFAULT_API_URL)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// Timing knobs for the live pipeline; unset values keep the library defaults.
    pub fn live_settings(&self) -> LiveSettings {
        let defaults = LiveSettings::default();
        LiveSettings {
            reconnect_delay: self
                .reconnect_delay_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconnect_delay),
            max_attempts: self.max_reconnect_attempts.unwrap_or(defaults.max_attempts),
            staleness: self
                .staleness_seconds
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.staleness),
            handshake_timeout: self
                .handshake_timeout_seconds
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.handshake_timeout),
            tick_interval: self
                .tick_millis
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick_interval),
        }
    }
}

/// Explicit path first, then `tempest_live.conf` in the working directory,
/// then the per-user config directory.
fn config_file_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return local;
    }
    match dirs::config_dir() {
        Some(dir) => dir.join("tempest_live").join("config.json"),
        None => local,
    }
}

fn read_config_file(path: &Path) -> (Option<Config>, ConfigSource) {
    if !path.exists() {
        return (None, ConfigSource::Missing(path.to_path_buf()));
    }
    let parsed = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))
        .and_then(|text| {
            serde_json::from_str::<Config>(&text)
                .with_context(|| format!("Failed to parse {}", path.display()))
        });
    match parsed {
        Ok(config) => (Some(config), ConfigSource::Loaded(path.to_path_buf())),
        Err(e) => (None, ConfigSource::Invalid(path.to_path_buf(), format!("{:#}", e))),
    }
}

/// Defaults, then the file, then environment and CLI on top.
fn layer(file: Option<Config>, cli: Config) -> Config {
    let mut config = Config::defaults();
    if let Some(file) = file {
        config = config.merge(file);
    }
    config.merge(cli)
}

pub fn load_config() -> (Config, ConfigSource) {
    // .env must be in the environment before clap reads its env fallbacks.
    let _ = dotenvy::dotenv();
    let cli = Config::parse();
    let path = config_file_path(cli.config_path.as_deref());
    let (file, source) = read_config_file(&path);
    (layer(file, cli), source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli(args: &[&str]) -> Config {
        let mut argv = vec!["tempest_live"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_cli_overrides_file_overrides_defaults() {
        let file = Config {
            device_id: Some(111),
            reconnect_delay_seconds: Some(9),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };
        let config = layer(Some(file), cli(&["--token", "abc", "--device-id", "222"]));

        assert_eq!(config.token().unwrap(), "abc");
        assert_eq!(config.device_id, Some(222));
        assert_eq!(config.log_level(), "debug");
        assert_eq!(config.ws_url(), DEFAULT_WSS_URL);

        let live = config.live_settings();
        assert_eq!(live.reconnect_delay, Duration::from_secs(9));
        assert_eq!(live.max_attempts, 5);
        assert_eq!(live.staleness, Duration::from_secs(660));
        assert_eq!(live.handshake_timeout, Duration::from_secs(45));
    }

    #[test]
    fn test_missing_token_is_an_error() {
        let config = layer(None, Config::default());
        assert!(config.token().is_err());

        let blank = Config {
            token: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(blank.token().is_err());
    }

    #[test]
    fn test_zero_intervals_fall_back_to_defaults() {
        let config = Config {
            staleness_seconds: Some(0),
            handshake_timeout_seconds: Some(0),
            tick_millis: Some(0),
            ..Default::default()
        };
        assert_eq!(config.live_settings(), LiveSettings::default());
    }

    #[test]
    fn test_reads_camel_case_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"token": "from-file", "stationId": 1234, "maxReconnectAttempts": 3}}"#
        )
        .unwrap();

        let (parsed, source) = read_config_file(file.path());
        let parsed = parsed.unwrap();
        assert_eq!(source, ConfigSource::Loaded(file.path().to_path_buf()));
        assert_eq!(parsed.station_id, Some(1234));
        assert_eq!(parsed.live_settings().max_attempts, 3);
        assert_eq!(parsed.token().unwrap(), "from-file");
    }

    #[test]
    fn test_bad_file_is_reported_not_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let (parsed, source) = read_config_file(file.path());
        assert!(parsed.is_none());
        assert!(matches!(source, ConfigSource::Invalid(_, _)));

        let missing = file.path().with_extension("absent");
        assert_eq!(read_config_file(&missing).1, ConfigSource::Missing(missing.clone()));
    }

    #[test]
    fn test_explicit_path_wins() {
        let explicit = PathBuf::from("/tmp/custom.json");
        assert_eq!(config_file_path(Some(&explicit)), explicit);
    }
}
