//! Local mirror of the panel's on-device configuration.
//!
//! The device reports its configuration as a flat 24-byte block. The client
//! keeps a copy of that block, overwrites it wholesale on every status reply
//! and patches single fields when it predicts the outcome of a command.
//! Predictions are hints only: the next reload always wins.

use crate::error::{CoreError, CoreResult};
use crate::mode::PanelMode;

/// Size of the status block reported by the device.
pub const STATUS_LEN: usize = 24;
/// Size of the hourglass settings block.
pub const HOURGLASS_LEN: usize = 4;

/// Highest displayed speed / light level.
pub const LEVEL_MAX: u8 = 6;
/// Lowest fan PWM level the device accepts.
pub const FAN_PWM_MIN: u8 = 3;
/// Highest fan PWM level the device accepts.
pub const FAN_PWM_MAX: u8 = 12;

const MODE_IDX: usize = 1;
const LIGHT_IDX: usize = 2;
const SPEED_IDX: usize = 3;
const COLOR_TABLE_IDX: usize = 4;
const LAMP_IDX: usize = 16;
const MOUSE_MODE_IDX: usize = 17;
const FAN_PWM_IDX: usize = 18;
const PWM_BYPASS_IDX: usize = 19;
const MOTHERBOARD_IN_IDX: usize = 20;
const DATA_SOURCE_IDX: usize = 21;
const PWM_IN_IDX: usize = 22;

/// Wire light value the firmware uses while the panel is dimmed off.
const LIGHT_RAW_OFF: u8 = 8;
/// Raw light value the firmware resumes from when brightening out of off.
const LIGHT_RAW_RESUME: u8 = 4;

/// Mirror of the 24-byte device status block.
///
/// Speed and light are stored inverted on the wire (`raw = 6 - displayed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PanelStatus {
    bytes: [u8; STATUS_LEN],
}

impl PanelStatus {
    /// Create an empty status block, as held before the first reload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a status block from the leading bytes of a reply payload.
    ///
    /// # Errors
    /// Returns an error if fewer than [`STATUS_LEN`] bytes are supplied.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let block = bytes.get(..STATUS_LEN).ok_or(CoreError::InvalidLength {
            what: "status",
            expected: STATUS_LEN,
            actual: bytes.len(),
        })?;
        let mut status = Self::default();
        status.bytes.copy_from_slice(block);
        Ok(status)
    }

    /// Raw status bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; STATUS_LEN] {
        &self.bytes
    }

    /// Bytes pushed back to the device by the status-update commands.
    #[must_use]
    pub fn update_payload(&self) -> &[u8] {
        &self.bytes[MODE_IDX..PWM_IN_IDX + 1]
    }

    /// Raw mode byte (`mode id + 1`, 0 when the panel has not reported one).
    #[must_use]
    pub fn mode_raw(&self) -> u8 {
        self.bytes[MODE_IDX]
    }

    /// Current mode, or `None` while uninitialized or unknown.
    #[must_use]
    pub fn mode(&self) -> Option<PanelMode> {
        self.mode_raw().checked_sub(1).and_then(PanelMode::from_id)
    }

    /// Record `mode` as the current mode.
    pub fn set_mode(&mut self, mode: PanelMode) {
        self.bytes[MODE_IDX] = mode.id() + 1;
    }

    /// Colour id configured for `mode`.
    #[must_use]
    pub fn mode_color_id(&self, mode: PanelMode) -> u8 {
        self.bytes[COLOR_TABLE_IDX + usize::from(mode.id())]
    }

    /// Set the colour id for `mode`.
    pub fn set_mode_color_id(&mut self, mode: PanelMode, color_id: u8) {
        self.bytes[COLOR_TABLE_IDX + usize::from(mode.id())] = color_id;
    }

    /// Displayed light level, always within `0..=6`.
    #[must_use]
    pub fn light(&self) -> u8 {
        LEVEL_MAX.saturating_sub(self.bytes[LIGHT_IDX])
    }

    /// Displayed animation speed, always within `0..=6`.
    #[must_use]
    pub fn speed(&self) -> u8 {
        LEVEL_MAX.saturating_sub(self.bytes[SPEED_IDX])
    }

    /// Predict one light step. Raw values only move inside `0..=6`.
    pub fn step_light(&mut self, up: bool) {
        let raw = &mut self.bytes[LIGHT_IDX];
        if up {
            if *raw == LIGHT_RAW_OFF {
                *raw = LIGHT_RAW_RESUME;
            }
            *raw = raw.saturating_sub(1);
        } else if *raw < LEVEL_MAX {
            *raw += 1;
        }
    }

    /// Predict one speed step. Raw values only move inside `0..=6`.
    pub fn step_speed(&mut self, up: bool) {
        let raw = &mut self.bytes[SPEED_IDX];
        if up {
            *raw = raw.saturating_sub(1);
        } else if *raw < LEVEL_MAX {
            *raw += 1;
        }
    }

    /// Fan PWM level (3-12 once the device has reported it).
    #[must_use]
    pub fn fan_pwm(&self) -> u8 {
        self.bytes[FAN_PWM_IDX]
    }

    /// Overwrite the fan PWM level.
    pub fn set_fan_pwm(&mut self, level: u8) {
        self.bytes[FAN_PWM_IDX] = level;
    }

    /// Predict one fan PWM step, clamped to `3..=12`.
    pub fn step_fan_pwm(&mut self, up: bool) {
        let raw = &mut self.bytes[FAN_PWM_IDX];
        if up {
            if *raw < FAN_PWM_MAX {
                *raw += 1;
            }
        } else if *raw > FAN_PWM_MIN {
            *raw -= 1;
        }
    }

    /// Whether the panel lamp is switched off.
    #[must_use]
    pub fn lamp_off(&self) -> bool {
        self.bytes[LAMP_IDX] != 0
    }

    /// Set the lamp-off flag.
    pub fn set_lamp_off(&mut self, off: bool) {
        self.bytes[LAMP_IDX] = u8::from(off);
    }

    /// Flip the lamp flag, as the lamp toggle command does.
    pub fn toggle_lamp(&mut self) {
        self.bytes[LAMP_IDX] ^= 1;
    }

    #[must_use]
    pub fn mouse_mode(&self) -> u8 {
        self.bytes[MOUSE_MODE_IDX]
    }

    /// Whether fan PWM passes straight through from the motherboard header.
    #[must_use]
    pub fn pwm_bypass(&self) -> bool {
        self.bytes[PWM_BYPASS_IDX] != 0
    }

    pub fn set_pwm_bypass(&mut self, bypass: bool) {
        self.bytes[PWM_BYPASS_IDX] = u8::from(bypass);
    }

    /// Whether a motherboard ARGB input is connected.
    #[must_use]
    pub fn motherboard_input(&self) -> bool {
        self.bytes[MOTHERBOARD_IN_IDX] != 0
    }

    /// Selected effect data source.
    #[must_use]
    pub fn data_source(&self) -> u8 {
        self.bytes[DATA_SOURCE_IDX]
    }

    pub fn set_data_source(&mut self, source: u8) {
        self.bytes[DATA_SOURCE_IDX] = source;
    }

    /// Flip the data source, as the data-source toggle command does.
    pub fn toggle_data_source(&mut self) {
        self.bytes[DATA_SOURCE_IDX] ^= 1;
    }

    /// Whether a PWM input signal is present.
    #[must_use]
    pub fn pwm_input(&self) -> bool {
        self.bytes[PWM_IN_IDX] != 0
    }
}

/// Hourglass effect settings (`reserved, timeout, interval, bitmap id`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HourglassSettings {
    bytes: [u8; HOURGLASS_LEN],
}

impl HourglassSettings {
    /// Create settings from their individual fields.
    #[must_use]
    pub fn new(timeout: u8, interval: u8, bitmap_id: u8) -> Self {
        Self { bytes: [0, timeout, interval, bitmap_id] }
    }

    /// Build settings from the leading bytes of a reply payload.
    ///
    /// # Errors
    /// Returns an error if fewer than [`HOURGLASS_LEN`] bytes are supplied.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let block = bytes.get(..HOURGLASS_LEN).ok_or(CoreError::InvalidLength {
            what: "hourglass",
            expected: HOURGLASS_LEN,
            actual: bytes.len(),
        })?;
        let mut settings = Self::default();
        settings.bytes.copy_from_slice(block);
        Ok(settings)
    }

    #[must_use]
    pub fn timeout(&self) -> u8 {
        self.bytes[1]
    }

    #[must_use]
    pub fn interval(&self) -> u8 {
        self.bytes[2]
    }

    /// Picture slot shown by the hourglass effect.
    #[must_use]
    pub fn bitmap_id(&self) -> u8 {
        self.bytes[3]
    }
}
