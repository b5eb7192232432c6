//! Panel routines built on the client: startup, mode switching and image playback.

use std::time::Duration;

use anyhow::{Context, Result};
use lumen_core::{PanelMode, PixelImage};
use lumen_hid::PanelClient;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::visualizer::Visualizer;

/// Picture slot used for images pushed from the host.
const IMAGE_SLOT: u8 = 0;

/// Bring the panel to the configured state and start the visualizer if
/// the panel ends up in spectrum mode.
///
/// # Errors
/// Returns an error if any step fails.
pub async fn initialize(
    panel: &PanelClient,
    visualizer: &mut Visualizer,
    config: &Config,
) -> Result<()> {
    let settings = &config.panel;

    if settings.sync_clock {
        panel.set_rtc().await.context("Failed to set panel clock")?;
    }
    let status = panel.load_status().await.context("Failed to load panel status")?;
    info!(
        mode = ?status.mode(),
        speed = status.speed(),
        light = status.light(),
        "Panel status loaded"
    );

    panel
        .set_data_source(settings.data_source)
        .await
        .context("Failed to set data source")?;

    if let Some(mode) = settings.mode {
        switch_mode(panel, visualizer, mode, settings.color_id).await?;
    }
    if let Some(speed) = settings.speed {
        panel.set_speed(speed).await.context("Failed to set speed")?;
    }
    if let Some(light) = settings.light {
        panel.set_light(light).await.context("Failed to set light")?;
    }
    if let Some(fan_pwm) = settings.fan_pwm {
        panel.set_fan_pwm(fan_pwm).await.context("Failed to set fan PWM")?;
    }

    let hourglass = panel.read_hourglass().await.context("Failed to read hourglass")?;
    if let Some(next) = config.hourglass.apply(hourglass) {
        panel
            .set_hourglass(next.timeout(), next.interval(), next.bitmap_id())
            .await
            .context("Failed to set hourglass")?;
    }

    follow_mode(panel, visualizer);
    info!("Panel initialized");
    Ok(())
}

/// Run the visualizer exactly when the panel is in spectrum mode.
pub fn follow_mode(panel: &PanelClient, visualizer: &mut Visualizer) {
    let spectrum = panel.mode() == Some(PanelMode::AudioSpectrum);

    if spectrum && !visualizer.is_running() {
        debug!("Panel is in spectrum mode");
        if let Err(e) = visualizer.start() {
            warn!(error = %e, "Failed to start visualizer");
        }
    } else if !spectrum && visualizer.is_running() {
        visualizer.stop();
    }
}

/// Switch modes, starting or stopping the visualizer to match.
///
/// # Errors
/// Returns an error if the mode cannot be set.
pub async fn switch_mode(
    panel: &PanelClient,
    visualizer: &mut Visualizer,
    mode: PanelMode,
    color_id: u8,
) -> Result<()> {
    panel.set_mode(mode, color_id).await.context("Failed to set mode")?;

    if mode == PanelMode::AudioSpectrum {
        visualizer.start().context("Failed to start visualizer")?;
    } else {
        visualizer.stop();
    }
    Ok(())
}

/// Show a still image and keep it across power cycles.
///
/// # Errors
/// Returns an error if any write fails.
pub async fn show_image(
    panel: &PanelClient,
    visualizer: &mut Visualizer,
    image: &PixelImage,
) -> Result<()> {
    switch_mode(panel, visualizer, PanelMode::Image, 0).await?;
    panel.write_image(IMAGE_SLOT, image).await.context("Failed to write image")?;
    panel.save_images().await.context("Failed to save images")?;
    Ok(())
}

/// Play decoded animation frames once. Each frame waits for its delay
/// before it is written.
///
/// # Errors
/// Returns an error if any write fails.
pub async fn play_frames(
    panel: &PanelClient,
    visualizer: &mut Visualizer,
    frames: &[(PixelImage, Duration)],
) -> Result<()> {
    switch_mode(panel, visualizer, PanelMode::Image, 0).await?;

    for (index, (image, delay)) in frames.iter().enumerate() {
        if !delay.is_zero() {
            sleep(*delay).await;
        }
        panel
            .write_image(IMAGE_SLOT, image)
            .await
            .with_context(|| format!("Failed to write frame {index}"))?;
    }

    debug!(frames = frames.len(), "Animation played");
    Ok(())
}
