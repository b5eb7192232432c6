//! Daemon configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use lumen_audio::spectrum::DEFAULT_BAND_FREQUENCIES;
use lumen_core::{BAND_COUNT, HourglassSettings, PanelMode};
use lumen_hid::transport::{INWIN_VID, PANEL_PID, PANEL_USAGE_PAGE};
use serde::{Deserialize, Serialize};

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Daemon settings
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// Device settings
    #[serde(default)]
    pub device: DeviceConfig,
    /// Panel state applied at startup
    #[serde(default)]
    pub panel: PanelConfig,
    /// Hourglass overrides applied at startup
    #[serde(default)]
    pub hourglass: HourglassConfig,
    /// Spectrum visualizer settings
    #[serde(default)]
    pub visualizer: VisualizerConfig,
}

/// Daemon-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// How often to reload the panel status, in milliseconds
    #[serde(default = "default_status_poll_ms")]
    pub status_poll_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { log_level: default_log_level(), status_poll_ms: default_status_poll_ms() }
    }
}

impl DaemonConfig {
    #[must_use]
    pub fn status_poll(&self) -> Duration {
        Duration::from_millis(self.status_poll_ms.max(1))
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_status_poll_ms() -> u64 {
    5000
}

/// Device settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// USB Vendor ID
    #[serde(default = "default_vid")]
    pub vendor_id: String,
    /// USB Product ID
    #[serde(default = "default_pid")]
    pub product_id: String,
    /// HID usage page of the control interface
    #[serde(default = "default_usage_page")]
    pub usage_page: u16,
    /// Drive an in-memory panel instead of hardware
    #[serde(default)]
    pub simulate: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            vendor_id: default_vid(),
            product_id: default_pid(),
            usage_page: default_usage_page(),
            simulate: false,
        }
    }
}

impl DeviceConfig {
    /// Parsed vendor and product ids.
    ///
    /// # Errors
    /// Returns an error if either id is not a hexadecimal `u16`.
    pub fn ids(&self) -> Result<(u16, u16)> {
        Ok((parse_hex_id(&self.vendor_id)?, parse_hex_id(&self.product_id)?))
    }
}

fn parse_hex_id(value: &str) -> Result<u16> {
    let digits = value.trim().trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).with_context(|| format!("Invalid USB id: {value:?}"))
}

fn default_vid() -> String {
    format!("{INWIN_VID:04x}")
}

fn default_pid() -> String {
    format!("{PANEL_PID:04x}")
}

fn default_usage_page() -> u16 {
    PANEL_USAGE_PAGE
}

/// Panel state applied at startup. Unset values keep what the panel has.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    pub mode: Option<PanelMode>,
    #[serde(default)]
    pub color_id: u8,
    pub speed: Option<u8>,
    pub light: Option<u8>,
    pub fan_pwm: Option<u8>,
    /// Effect data source
    #[serde(default)]
    pub data_source: u8,
    /// Set the panel clock to local time
    #[serde(default = "default_true")]
    pub sync_clock: bool,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            mode: None,
            color_id: 0,
            speed: None,
            light: None,
            fan_pwm: None,
            data_source: 0,
            sync_clock: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Hourglass overrides.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HourglassConfig {
    pub timeout: Option<u8>,
    pub interval: Option<u8>,
    pub bitmap_id: Option<u8>,
}

impl HourglassConfig {
    /// `current` with the configured fields replaced, or `None` if nothing is configured.
    #[must_use]
    pub fn apply(&self, current: HourglassSettings) -> Option<HourglassSettings> {
        if self.timeout.is_none() && self.interval.is_none() && self.bitmap_id.is_none() {
            return None;
        }
        Some(HourglassSettings::new(
            self.timeout.unwrap_or(current.timeout()),
            self.interval.unwrap_or(current.interval()),
            self.bitmap_id.unwrap_or(current.bitmap_id()),
        ))
    }
}

/// Spectrum visualizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualizerConfig {
    /// Time between spectrum frames, in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Centre frequency of each band, in Hz
    #[serde(default = "default_band_frequencies")]
    pub band_frequencies: [u32; BAND_COUNT],
}

impl Default for VisualizerConfig {
    fn default() -> Self {
        Self { interval_ms: default_interval_ms(), band_frequencies: default_band_frequencies() }
    }
}

impl VisualizerConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

fn default_interval_ms() -> u64 {
    200
}

fn default_band_frequencies() -> [u32; BAND_COUNT] {
    DEFAULT_BAND_FREQUENCIES
}

/// Where the configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    Defaults,
}

/// Load configuration from the default location, falling back to defaults.
///
/// Runs before logging is set up, so it does not log; callers report the
/// returned path and source once the subscriber is installed.
///
/// # Errors
/// Returns an error if the config directory cannot be determined or the
/// file exists but cannot be read or parsed.
pub fn load_config() -> Result<(Config, PathBuf, ConfigSource)> {
    let path = config_path()?;
    let (config, source) = load_config_from(&path)?;
    Ok((config, path, source))
}

/// Load configuration from `path`, falling back to defaults if it does not exist.
///
/// # Errors
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config_from(path: &Path) -> Result<(Config, ConfigSource)> {
    if !path.exists() {
        return Ok((Config::default(), ConfigSource::Defaults));
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {path:?}"))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {path:?}"))?;
    Ok((config, ConfigSource::File))
}

/// Get the configuration file path.
///
/// # Errors
/// Returns an error if no home directory is known.
pub fn config_path() -> Result<PathBuf> {
    let dirs =
        ProjectDirs::from("com", "lumen", "Lumen").context("Could not determine config directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(content.as_bytes()).expect("Failed to write config");
        file
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let (config, source) = load_config_from(&dir.path().join("config.toml")).unwrap();

        assert_eq!(source, ConfigSource::Defaults);
        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.daemon.status_poll(), Duration::from_secs(5));
        assert_eq!(config.device.ids().unwrap(), (0xFF00, 0x020C));
        assert!(!config.device.simulate);
        assert!(config.panel.sync_clock);
        assert_eq!(config.panel.mode, None);
        assert_eq!(config.visualizer.interval(), Duration::from_millis(200));
        assert_eq!(config.visualizer.band_frequencies, DEFAULT_BAND_FREQUENCIES);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let file = write_config(
            r#"
            [device]
            simulate = true

            [panel]
            mode = "audio_spectrum"
            color_id = 2
            speed = 4

            [hourglass]
            timeout = 90
            "#,
        );

        let (config, source) = load_config_from(file.path()).unwrap();

        assert_eq!(source, ConfigSource::File);
        assert!(config.device.simulate);
        assert_eq!(config.device.vendor_id, "ff00");
        assert_eq!(config.panel.mode, Some(PanelMode::AudioSpectrum));
        assert_eq!(config.panel.color_id, 2);
        assert_eq!(config.panel.speed, Some(4));
        assert_eq!(config.panel.light, None);
        assert_eq!(config.hourglass.timeout, Some(90));
        assert_eq!(config.daemon.status_poll_ms, 5000);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let file = write_config("[panel]\nmode = \"disco\"\n");
        assert!(load_config_from(file.path()).is_err());
    }

    #[test]
    fn test_hex_ids() {
        let device = DeviceConfig {
            vendor_id: "0xFF00".to_string(),
            product_id: " 20c ".to_string(),
            ..DeviceConfig::default()
        };
        assert_eq!(device.ids().unwrap(), (0xFF00, 0x020C));

        let bad = DeviceConfig { vendor_id: "panel".to_string(), ..DeviceConfig::default() };
        assert!(bad.ids().is_err());
    }

    #[test]
    fn test_hourglass_overrides() {
        let current = HourglassSettings::new(30, 1, 0);

        assert_eq!(HourglassConfig::default().apply(current), None);

        let config = HourglassConfig { interval: Some(5), ..HourglassConfig::default() };
        assert_eq!(config.apply(current), Some(HourglassSettings::new(30, 5, 0)));
    }
}
