//! Lumen Daemon - InWin 309 front panel service.
//!
//! Connects to the panel, applies the configured state and feeds the audio
//! spectrum effect while the panel shows it.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use lumen_audio::CpalLoopback;
use lumen_daemon::visualizer::{Tick, Visualizer};
use lumen_daemon::config::ConfigSource;
use lumen_daemon::{config, routine, signals};
use lumen_hid::{HidTransport, PanelClient, SimulatedPanel};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration; reported once logging is up
    let (config, config_path, config_source) = config::load_config()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.daemon.log_level))
        .context("Invalid log level")?
        .add_directive("lumen=info".parse()?)
        .add_directive("lumen_daemon=debug".parse()?);
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Lumen daemon");
    match config_source {
        ConfigSource::File => info!(config_path = ?config_path, "Configuration loaded"),
        ConfigSource::Defaults => {
            info!(config_path = ?config_path, "Config file not found, using defaults");
        }
    }

    // Open the panel
    let panel = if config.device.simulate {
        info!("Using simulated panel");
        PanelClient::new(SimulatedPanel::new())
    } else {
        let (vendor_id, product_id) = config.device.ids()?;
        let transport = HidTransport::open(vendor_id, product_id, config.device.usage_page)
            .context("Failed to open panel")?;
        PanelClient::new(transport)
    };
    let panel = Arc::new(panel);
    info!("Connected to panel");

    // Spawn the loopback runtime
    let source = CpalLoopback::spawn().context("Failed to start audio runtime")?;
    let mut visualizer = Visualizer::new(
        Arc::clone(&panel),
        Box::new(source),
        config.visualizer.band_frequencies,
    );

    routine::initialize(&panel, &mut visualizer, &config).await?;

    // Set up signal handling
    let mut shutdown_rx = signals::setup_signal_handlers();

    let mut frames = interval(config.visualizer.interval());
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut status_poll = interval(config.daemon.status_poll());
    status_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Daemon running. Press Ctrl+C to exit.");

    // Main event loop
    loop {
        tokio::select! {
            _ = frames.tick(), if visualizer.is_running() => {
                match visualizer.tick().await {
                    Ok(Tick::LeftSpectrumMode) => info!("Panel left spectrum mode"),
                    Ok(Tick::Sent | Tick::Idle) => {}
                    Err(e) => error!(error = %e, "Failed to write spectrum"),
                }
            }

            _ = status_poll.tick() => {
                match panel.load_status().await {
                    Ok(status) => {
                        debug!(mode = ?status.mode(), "Panel status polled");
                        routine::follow_mode(&panel, &mut visualizer);
                    }
                    Err(e) => warn!(error = %e, "Failed to poll panel status"),
                }
            }

            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    // Cleanup
    info!("Shutting down...");
    visualizer.stop();
    panel.close().await;

    info!("Lumen daemon stopped");
    Ok(())
}
