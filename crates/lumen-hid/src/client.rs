//! Panel protocol client.
//!
//! All exchanges go through one async mutex around the transport, so only
//! one command is ever in flight. Every command is followed by a fixed
//! settle delay; the panel drops commands that arrive faster than that.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{Datelike, Local, Timelike};
use lumen_core::image::IMAGE_LEN;
use lumen_core::status::{FAN_PWM_MAX, FAN_PWM_MIN, LEVEL_MAX};
use lumen_core::{HourglassSettings, PanelMode, PanelStatus, PixelImage, SpectrumBands};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{HidError, HidResult};
use crate::packet::{self, Frame, IMAGE_CHUNK_LEN, IMAGE_CHUNKS, Toggle};
use crate::transport::Transport;

/// Settle time after queries and status pushes.
const QUERY_SETTLE: Duration = Duration::from_millis(50);
/// Settle time after ordinary commands.
const COMMAND_SETTLE: Duration = Duration::from_millis(100);
/// Settle time after a spectrum write.
const SPECTRUM_SETTLE: Duration = Duration::from_millis(300);
/// Extra gap between consecutive image chunks.
const IMAGE_CHUNK_GAP: Duration = Duration::from_millis(300);
/// Settle time after persisting pictures to flash.
const SAVE_SETTLE: Duration = Duration::from_millis(500);

type Link = Option<Box<dyn Transport>>;

/// A value adjusted one unit per command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Speed,
    Light,
    FanPwm,
}

impl Level {
    fn name(self) -> &'static str {
        match self {
            Self::Speed => "speed",
            Self::Light => "light",
            Self::FanPwm => "fan PWM",
        }
    }

    fn range(self) -> (u8, u8) {
        match self {
            Self::Speed | Self::Light => (0, LEVEL_MAX),
            Self::FanPwm => (FAN_PWM_MIN, FAN_PWM_MAX),
        }
    }

    fn current(self, status: &PanelStatus) -> u8 {
        match self {
            Self::Speed => status.speed(),
            Self::Light => status.light(),
            Self::FanPwm => status.fan_pwm(),
        }
    }

    fn command(self, up: bool) -> Toggle {
        match (self, up) {
            (Self::Speed, true) => Toggle::SpeedUp,
            (Self::Speed, false) => Toggle::SpeedDown,
            (Self::Light, true) => Toggle::LightUp,
            (Self::Light, false) => Toggle::LightDown,
            (Self::FanPwm, true) => Toggle::FanPwmUp,
            (Self::FanPwm, false) => Toggle::FanPwmDown,
        }
    }

    fn predict(self, status: &mut PanelStatus, up: bool) {
        match self {
            Self::Speed => status.step_speed(up),
            Self::Light => status.step_light(up),
            Self::FanPwm => status.step_fan_pwm(up),
        }
    }
}

#[derive(Debug, Default)]
struct Cache {
    status: PanelStatus,
    hourglass: HourglassSettings,
}

/// Client for one panel.
///
/// Status getters read the local mirror and never touch the device. Writes
/// predict their effect on the mirror; [`PanelClient::load_status`] replaces
/// the prediction with what the device reports.
pub struct PanelClient {
    link: Mutex<Link>,
    cache: RwLock<Cache>,
    closing: AtomicBool,
}

impl PanelClient {
    /// Create a client over an open transport.
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            link: Mutex::new(Some(Box::new(transport))),
            cache: RwLock::new(Cache::default()),
            closing: AtomicBool::new(false),
        }
    }

    /// Whether the transport is still attached.
    pub async fn is_connected(&self) -> bool {
        self.link.lock().await.is_some()
    }

    /// Detach the transport. Running adjustment loops stop after their
    /// current step and every later call fails with [`HidError::NotConnected`].
    pub async fn close(&self) {
        self.closing.store(true, Ordering::Release);
        if self.link.lock().await.take().is_some() {
            info!("Panel client closed");
        }
    }

    /// Snapshot of the status mirror.
    #[must_use]
    pub fn status(&self) -> PanelStatus {
        self.cache.read().status
    }

    /// Snapshot of the hourglass mirror.
    #[must_use]
    pub fn hourglass(&self) -> HourglassSettings {
        self.cache.read().hourglass
    }

    /// Current mode, `None` before the device has reported one.
    #[must_use]
    pub fn mode(&self) -> Option<PanelMode> {
        self.cache.read().status.mode()
    }

    #[must_use]
    pub fn speed(&self) -> u8 {
        self.cache.read().status.speed()
    }

    #[must_use]
    pub fn light(&self) -> u8 {
        self.cache.read().status.light()
    }

    #[must_use]
    pub fn fan_pwm(&self) -> u8 {
        self.cache.read().status.fan_pwm()
    }

    /// Colour id configured for `mode`.
    #[must_use]
    pub fn mode_color_id(&self, mode: PanelMode) -> u8 {
        self.cache.read().status.mode_color_id(mode)
    }

    /// Reload the full status from the device.
    ///
    /// # Errors
    /// Fails if the panel is not connected or the reply is truncated.
    pub async fn load_status(&self) -> HidResult<PanelStatus> {
        let mut link = self.link.lock().await;
        self.reload(&mut link).await
    }

    /// Switch the panel to `mode` with colour variant `color_id`.
    ///
    /// # Errors
    /// Fails if the panel is not connected.
    pub async fn set_mode(&self, mode: PanelMode, color_id: u8) -> HidResult<()> {
        let mut link = self.link.lock().await;
        ensure_connected(&link)?;
        self.cache.write().status.set_mode_color_id(mode, color_id);
        send(&mut link, &packet::set_mode(mode, color_id), COMMAND_SETTLE).await?;
        self.cache.write().status.set_mode(mode);
        info!(%mode, color_id, "Panel mode set");
        Ok(())
    }

    /// Switch to a mode given by its raw id, accepting the legacy spectrum id.
    ///
    /// # Errors
    /// Fails if the id is unknown or the panel is not connected.
    pub async fn set_mode_id(&self, id: u8, color_id: u8) -> HidResult<()> {
        let mode = PanelMode::try_from(id)?;
        self.set_mode(mode, color_id).await
    }

    /// Step the animation speed until it reads `target` (0-6).
    ///
    /// # Errors
    /// Fails if `target` is out of range, the device stops responding or
    /// the client is closed mid-way.
    pub async fn set_speed(&self, target: u8) -> HidResult<()> {
        self.converge(Level::Speed, target).await
    }

    /// Step the light level until it reads `target` (0-6).
    ///
    /// # Errors
    /// See [`PanelClient::set_speed`].
    pub async fn set_light(&self, target: u8) -> HidResult<()> {
        self.converge(Level::Light, target).await
    }

    /// Step the fan PWM level until it reads `target` (3-12).
    ///
    /// # Errors
    /// See [`PanelClient::set_speed`].
    pub async fn set_fan_pwm(&self, target: u8) -> HidResult<()> {
        self.converge(Level::FanPwm, target).await
    }

    /// Send one speed step without reloading.
    ///
    /// # Errors
    /// Fails if the panel is not connected.
    pub async fn step_speed(&self, up: bool) -> HidResult<()> {
        let mut link = self.link.lock().await;
        self.step(&mut link, Level::Speed, up).await
    }

    /// Send one light step without reloading.
    ///
    /// # Errors
    /// Fails if the panel is not connected.
    pub async fn step_light(&self, up: bool) -> HidResult<()> {
        let mut link = self.link.lock().await;
        self.step(&mut link, Level::Light, up).await
    }

    /// Send one fan PWM step without reloading.
    ///
    /// # Errors
    /// Fails if the panel is not connected.
    pub async fn step_fan_pwm(&self, up: bool) -> HidResult<()> {
        let mut link = self.link.lock().await;
        self.step(&mut link, Level::FanPwm, up).await
    }

    /// Set the panel clock to the local time.
    ///
    /// # Errors
    /// Fails if the panel is not connected.
    pub async fn set_rtc(&self) -> HidResult<()> {
        self.set_clock(&Local::now()).await
    }

    /// Set the panel clock to `now`.
    ///
    /// # Errors
    /// Fails if the panel is not connected.
    pub async fn set_clock<T: Datelike + Timelike + Sync>(&self, now: &T) -> HidResult<()> {
        let frame = packet::set_rtc(now);
        let mut link = self.link.lock().await;
        send(&mut link, &frame, COMMAND_SETTLE).await?;
        debug!("Panel clock set");
        Ok(())
    }

    /// Load the hourglass settings from the device.
    ///
    /// # Errors
    /// Fails if the panel is not connected or the reply is truncated.
    pub async fn read_hourglass(&self) -> HidResult<HourglassSettings> {
        let mut link = self.link.lock().await;
        let reply = request(&mut link, &packet::hourglass_read(), QUERY_SETTLE).await?;
        let settings = packet::parse_hourglass(&reply)?;
        self.cache.write().hourglass = settings;
        Ok(settings)
    }

    /// Update the hourglass settings.
    ///
    /// # Errors
    /// Fails if the panel is not connected.
    pub async fn set_hourglass(&self, timeout: u8, interval: u8, bitmap_id: u8) -> HidResult<()> {
        let settings = HourglassSettings::new(timeout, interval, bitmap_id);
        let mut link = self.link.lock().await;
        ensure_connected(&link)?;
        self.cache.write().hourglass = settings;
        send(&mut link, &packet::hourglass_write(&settings), COMMAND_SETTLE).await
    }

    /// Send one set of spectrum bands.
    ///
    /// The panel answers either with an acknowledgment or with a status
    /// block; the latter replaces the status mirror.
    ///
    /// # Errors
    /// Fails if the panel is not connected.
    pub async fn write_spectrum(&self, bands: &SpectrumBands) -> HidResult<()> {
        let mut link = self.link.lock().await;
        let reply = request(&mut link, &packet::spectrum(bands), SPECTRUM_SETTLE).await?;
        if let Some(status) = packet::spectrum_status(&reply) {
            debug!(mode = ?status.mode(), "Spectrum reply carried status");
            self.cache.write().status = status;
        }
        Ok(())
    }

    /// Write `image` into picture slot `picture_id`.
    ///
    /// The image goes out as eight chunks, one per column index. A failure
    /// part-way leaves the slot partially updated.
    ///
    /// # Errors
    /// Fails if the panel is not connected.
    pub async fn write_image(&self, picture_id: u8, image: &PixelImage) -> HidResult<()> {
        let bytes = image.to_bytes();
        let mut link = self.link.lock().await;

        for column in 0..IMAGE_CHUNKS {
            send(&mut link, &packet::image_chunk(picture_id, column, &bytes), COMMAND_SETTLE)
                .await?;
            sleep(IMAGE_CHUNK_GAP).await;
        }

        debug!(picture_id, "Image written");
        Ok(())
    }

    /// Read picture slot `id` back from the device.
    ///
    /// # Errors
    /// Fails if the panel is not connected or a reply is truncated.
    pub async fn read_picture(&self, id: u8) -> HidResult<PixelImage> {
        let mut pixels = [0u8; IMAGE_LEN];
        let mut link = self.link.lock().await;

        // The device addresses the 432 bytes as eight 54-byte rows.
        for (row, chunk) in (0..IMAGE_CHUNKS).zip(pixels.chunks_exact_mut(IMAGE_CHUNK_LEN)) {
            let reply = request(&mut link, &packet::image_read(id, row), QUERY_SETTLE).await?;
            chunk.copy_from_slice(packet::parse_image_row(&reply)?);
        }

        Ok(PixelImage::from_bytes(&pixels)?)
    }

    /// Persist written pictures to flash.
    ///
    /// # Errors
    /// Fails if the panel is not connected.
    pub async fn save_images(&self) -> HidResult<()> {
        let mut link = self.link.lock().await;
        send(&mut link, &packet::save_images(), SAVE_SETTLE).await?;
        info!("Pictures saved");
        Ok(())
    }

    /// Toggle the lamp.
    ///
    /// # Errors
    /// Fails if the panel is not connected.
    pub async fn toggle_lamp(&self) -> HidResult<()> {
        let mut link = self.link.lock().await;
        send(&mut link, &packet::toggle(Toggle::Lamp), COMMAND_SETTLE).await?;
        self.cache.write().status.toggle_lamp();
        Ok(())
    }

    /// Toggle the effect data source.
    ///
    /// # Errors
    /// Fails if the panel is not connected.
    pub async fn change_data_source(&self) -> HidResult<()> {
        let mut link = self.link.lock().await;
        send(&mut link, &packet::toggle(Toggle::DataSource), COMMAND_SETTLE).await?;
        self.cache.write().status.toggle_data_source();
        Ok(())
    }

    /// Switch the lamp on or off.
    ///
    /// # Errors
    /// Fails if the panel is not connected.
    pub async fn set_lamp_off(&self, off: bool) -> HidResult<()> {
        self.push_with(|status| status.set_lamp_off(off)).await
    }

    /// Set the fan PWM level directly.
    ///
    /// # Errors
    /// Fails if `level` is outside 3-12 or the panel is not connected.
    pub async fn set_pwm_level(&self, level: u8) -> HidResult<()> {
        check_range(Level::FanPwm, level)?;
        self.push_with(|status| status.set_fan_pwm(level)).await
    }

    /// Pass fan PWM through from the motherboard.
    ///
    /// # Errors
    /// Fails if the panel is not connected.
    pub async fn set_pwm_bypass(&self, bypass: bool) -> HidResult<()> {
        self.push_with(|status| status.set_pwm_bypass(bypass)).await
    }

    /// Select the effect data source.
    ///
    /// # Errors
    /// Fails if the panel is not connected.
    pub async fn set_data_source(&self, source: u8) -> HidResult<()> {
        self.push_with(|status| status.set_data_source(source)).await
    }

    /// Push the status mirror to the device.
    ///
    /// # Errors
    /// Fails if the panel is not connected.
    pub async fn push_status(&self) -> HidResult<()> {
        self.push_with(|_| {}).await
    }

    /// Push the status mirror and make it the power-on default.
    ///
    /// # Errors
    /// Fails if the panel is not connected.
    pub async fn save_default_status(&self) -> HidResult<()> {
        let mut link = self.link.lock().await;
        let frame = packet::status_update(&self.cache.read().status, true);
        request(&mut link, &frame, QUERY_SETTLE).await?;
        info!("Status saved as default");
        Ok(())
    }

    async fn push_with(&self, edit: impl FnOnce(&mut PanelStatus)) -> HidResult<()> {
        let mut link = self.link.lock().await;
        ensure_connected(&link)?;
        let frame = {
            let mut cache = self.cache.write();
            edit(&mut cache.status);
            packet::status_update(&cache.status, false)
        };
        request(&mut link, &frame, QUERY_SETTLE).await?;
        Ok(())
    }

    async fn reload(&self, link: &mut Link) -> HidResult<PanelStatus> {
        let reply = request(link, &packet::status_query(), QUERY_SETTLE).await?;
        let status = packet::parse_status(&reply)?;
        self.cache.write().status = status;
        Ok(status)
    }

    async fn step(&self, link: &mut Link, level: Level, up: bool) -> HidResult<()> {
        ensure_connected(link)?;
        level.predict(&mut self.cache.write().status, up);
        send(link, &packet::toggle(level.command(up)), COMMAND_SETTLE).await
    }

    /// Step `level` toward `target`, reloading after each step. Gives up
    /// once the number of steps equals the width of the valid range.
    async fn converge(&self, level: Level, target: u8) -> HidResult<()> {
        let (min, max) = check_range(level, target)?;
        let max_steps = max - min;

        let mut link = self.link.lock().await;
        let mut current = level.current(&self.cache.read().status);
        let mut steps = 0;

        while current != target {
            if self.closing.load(Ordering::Acquire) {
                return Err(HidError::Closed);
            }
            if steps == max_steps {
                warn!(what = level.name(), target, current, steps, "Panel did not converge");
                return Err(HidError::Unresponsive { what: level.name(), target, steps });
            }

            self.step(&mut link, level, current < target).await?;
            current = level.current(&self.reload(&mut link).await?);
            steps += 1;
        }

        debug!(what = level.name(), target, steps, "Level reached");
        Ok(())
    }
}

fn check_range(level: Level, value: u8) -> HidResult<(u8, u8)> {
    let (min, max) = level.range();
    if (min..=max).contains(&value) {
        Ok((min, max))
    } else {
        Err(HidError::OutOfRange { what: level.name(), value, min, max })
    }
}

fn ensure_connected(link: &Link) -> HidResult<()> {
    if link.is_some() { Ok(()) } else { Err(HidError::NotConnected) }
}

async fn send(link: &mut Link, frame: &Frame, settle: Duration) -> HidResult<()> {
    let transport = link.as_mut().ok_or(HidError::NotConnected)?;
    transport.write(frame)?;
    sleep(settle).await;
    Ok(())
}

async fn request(link: &mut Link, frame: &Frame, settle: Duration) -> HidResult<Vec<u8>> {
    let transport = link.as_mut().ok_or(HidError::NotConnected)?;
    let reply = transport.write_and_read(frame)?;
    sleep(settle).await;
    Ok(reply)
}
