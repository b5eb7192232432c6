//! Spectrum band intensities sent to the panel.

use crate::PANEL_WIDTH;

/// Number of visual bands, one per panel column.
pub const BAND_COUNT: usize = PANEL_WIDTH;

/// One intensity byte per band, index-aligned with the panel columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpectrumBands([u8; BAND_COUNT]);

impl SpectrumBands {
    #[must_use]
    pub fn new(bands: [u8; BAND_COUNT]) -> Self {
        Self(bands)
    }

    /// Convert computed levels into wire bytes, clamping to `0..=255`.
    #[must_use]
    pub fn from_levels(levels: [i32; BAND_COUNT]) -> Self {
        Self(levels.map(|level| u8::try_from(level.clamp(0, 255)).unwrap_or(u8::MAX)))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; BAND_COUNT] {
        &self.0
    }
}
