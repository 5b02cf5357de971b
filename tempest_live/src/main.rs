use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;

mod live_logic;
use live_logic::config::{self, Config, ConfigSource};
use live_logic::{logger, presenter};

use lib_tempest::core::spawn_live;
use lib_tempest::ingestors::WssDialer;
use lib_tempest::retrieve::{fetch_station_meta, ApiClient};
use lib_tempest::StationMeta;

/// Resolves what to subscribe to before anything connects.
async fn resolve_station(config: &Config, token: &str) -> Result<StationMeta> {
    match (config.station_id, config.device_id) {
        (Some(station_id), device_override) => {
            let client = ApiClient::new(config.api_url(), Some(token.to_string()))?;
            let mut meta = fetch_station_meta(&client, station_id).await?;
            if let Some(device_id) = device_override {
                log::info!("Using configured device {} instead of {}.", device_id, meta.device_id);
                meta.device_id = device_id;
            }
            Ok(meta)
        }
        (None, Some(device_id)) => Ok(StationMeta {
            device_id,
            station_name: format!("Device {}", device_id),
            timezone: "UTC".to_string(),
        }),
        (None, None) => anyhow::bail!(
            "Neither a station id nor a device id is configured; set TEMPEST_STATION_ID or TEMPEST_DEVICE_ID"
        ),
    }
}

async fn wait_for_signal() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Could not install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    let (config, source) = config::load_config();
    logger::setup_logging(&config.log_dir(), config.log_level())?;

    match &source {
        ConfigSource::Loaded(path) => log::info!("Loaded config file {}.", path.display()),
        ConfigSource::Missing(path) => log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            path.display()
        ),
        ConfigSource::Invalid(path, e) => log::warn!(
            "Ignoring config file {}: {}. Falling back to other sources.",
            path.display(),
            e
        ),
    }

    let token = config.token()?;
    let station = resolve_station(&config, token).await.map_err(|e| {
        log::error!("Station lookup failed: {:#}", e);
        e
    })?;

    let dialer = WssDialer::new(config.ws_url(), token)
        .with_context(|| format!("Invalid websocket URL '{}'", config.ws_url()))?;
    let settings = config.live_settings();

    let handle = spawn_live(Arc::new(dialer), station, settings);
    let presenter_handle = tokio::spawn(presenter::run(
        handle.subscribe(),
        settings.tick_interval,
        handle.shutdown_token(),
    ));

    wait_for_signal().await;

    handle.shutdown();
    if let Err(e) = handle.join().await {
        log::error!("Live pipeline ended abnormally: {}", e);
    }
    let _ = presenter_handle.await;

    log::info!("Shutdown complete.");
    Ok(())
}
