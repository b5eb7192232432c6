//! Band extraction from captured frames.

use std::sync::Arc;

use lumen_core::{BAND_COUNT, SpectrumBands};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use tracing::debug;

use crate::capture::{AudioFrame, FRAME_SAMPLES};

/// FFT window length, one full captured frame.
pub const FFT_SIZE: usize = FRAME_SAMPLES;

/// Default centre frequency of each band, in Hz.
pub const DEFAULT_BAND_FREQUENCIES: [u32; BAND_COUNT] =
    [63, 128, 260, 600, 1100, 2100, 4000, 8000];

/// Frames averaged per band.
pub const HISTORY_LEN: usize = 4;

const NOISE_FLOOR: f64 = 10.0;
const LOG_SCALE: f64 = 50.0;
const BASELINE: i32 = 300;
const COMPRESSION: i32 = 16;

/// FFT bin index for `frequency` at `sample_rate`.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn band_bin(frequency: u32, sample_rate: u32) -> usize {
    if sample_rate == 0 {
        return 0;
    }
    let bin = f64::from(frequency) * FFT_SIZE as f64 / (f64::from(sample_rate) * 2.0);
    (bin.round() as usize).min(FFT_SIZE - 1)
}

/// Bin index of every band.
#[must_use]
pub fn band_bins(frequencies: &[u32; BAND_COUNT], sample_rate: u32) -> [usize; BAND_COUNT] {
    frequencies.map(|frequency| band_bin(frequency, sample_rate))
}

/// Log-scaled level of one FFT magnitude.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn magnitude_level(magnitude: f64) -> i32 {
    ((magnitude + NOISE_FLOOR).log10() * LOG_SCALE) as i32
}

/// Rolling history of the last [`HISTORY_LEN`] levels of every band.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BandHistory {
    values: [[i32; HISTORY_LEN]; BAND_COUNT],
    index: usize,
}

impl BandHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the oldest entry of every band with `levels`.
    pub fn push(&mut self, levels: [i32; BAND_COUNT]) {
        for (ring, level) in self.values.iter_mut().zip(levels) {
            ring[self.index] = level;
        }
        self.index = (self.index + 1) % HISTORY_LEN;
    }

    /// Mean of the history of `band`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn mean(&self, band: usize) -> i32 {
        self.values
            .get(band)
            .map_or(0, |ring| ring.iter().sum::<i32>() / HISTORY_LEN as i32)
    }

    /// Smoothed output bands.
    #[must_use]
    pub fn bands(&self) -> SpectrumBands {
        let mut levels = [0i32; BAND_COUNT];
        for (band, level) in levels.iter_mut().enumerate() {
            *level = (self.mean(band) - BASELINE).max(0) / COMPRESSION;
        }
        SpectrumBands::from_levels(levels)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Turns captured frames into smoothed spectrum bands.
pub struct SpectrumExtractor {
    fft: Arc<dyn Fft<f64>>,
    buffer: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
    frequencies: [u32; BAND_COUNT],
    sample_rate: u32,
    bins: [usize; BAND_COUNT],
    history: BandHistory,
}

impl SpectrumExtractor {
    /// Create an extractor for the given band frequencies.
    #[must_use]
    pub fn new(frequencies: [u32; BAND_COUNT], sample_rate: u32) -> Self {
        let fft = FftPlanner::<f64>::new().plan_fft_forward(FFT_SIZE);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        Self {
            fft,
            buffer: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            scratch,
            frequencies,
            sample_rate,
            bins: band_bins(&frequencies, sample_rate),
            history: BandHistory::new(),
        }
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub fn bins(&self) -> [usize; BAND_COUNT] {
        self.bins
    }

    #[must_use]
    pub fn history(&self) -> &BandHistory {
        &self.history
    }

    /// Remap bands to bins for a new capture rate.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.bins = band_bins(&self.frequencies, sample_rate);
        debug!(sample_rate, bins = ?self.bins, "Band bins updated");
    }

    /// Log-scaled level of every band in `frame`, before smoothing.
    pub fn levels(&mut self, frame: &AudioFrame) -> [i32; BAND_COUNT] {
        self.buffer.fill(Complex::new(0.0, 0.0));
        for (slot, sample) in self.buffer.iter_mut().zip(frame.samples()) {
            slot.re = f64::from(sample);
        }
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        self.bins.map(|bin| magnitude_level(self.buffer[bin].norm()))
    }

    /// Feed one frame and return the smoothed bands.
    pub fn process(&mut self, frame: &AudioFrame) -> SpectrumBands {
        let levels = self.levels(frame);
        self.history.push(levels);
        self.history.bands()
    }

    /// Zero every band history.
    pub fn clear(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::f64::consts::TAU;

    #[allow(clippy::cast_possible_truncation)]
    fn sine_frame(bin: usize, amplitude: f64) -> AudioFrame {
        let samples: Vec<i32> = (0..FFT_SIZE)
            .map(|n| (amplitude * (TAU * (bin * n) as f64 / FFT_SIZE as f64).sin()).round() as i32)
            .collect();
        AudioFrame::from_samples(&samples)
    }

    #[test]
    fn test_default_bins_at_48k() {
        assert_eq!(
            band_bins(&DEFAULT_BAND_FREQUENCIES, 48_000),
            [1, 3, 6, 13, 23, 45, 85, 171]
        );
    }

    #[test]
    fn test_default_bins_at_44k1() {
        assert_eq!(
            band_bins(&DEFAULT_BAND_FREQUENCIES, 44_100),
            [1, 3, 6, 14, 26, 49, 93, 186]
        );
    }

    #[test]
    fn test_zero_sample_rate_maps_to_dc() {
        assert_eq!(band_bin(8000, 0), 0);
    }

    proptest! {
        #[test]
        fn prop_bins_strictly_increase(sample_rate in 16_000u32..=48_000) {
            let bins = band_bins(&DEFAULT_BAND_FREQUENCIES, sample_rate);
            prop_assert!(bins.windows(2).all(|w| w[0] < w[1]), "{bins:?}");
        }

        #[test]
        fn prop_bins_never_decrease(sample_rate in 16_000u32..=192_000) {
            let bins = band_bins(&DEFAULT_BAND_FREQUENCIES, sample_rate);
            prop_assert!(bins.windows(2).all(|w| w[0] <= w[1]), "{bins:?}");
            prop_assert_eq!(bins, band_bins(&DEFAULT_BAND_FREQUENCIES, sample_rate));
        }
    }

    #[test]
    fn test_history_mean_and_baseline() {
        let mut history = BandHistory::new();
        for _ in 0..4 {
            history.push([0; BAND_COUNT]);
        }
        history.push([640; BAND_COUNT]);

        assert_eq!(history.mean(0), 160);
        assert_eq!(history.bands(), SpectrumBands::default());
    }

    #[test]
    fn test_history_wraps_after_four() {
        let mut history = BandHistory::new();
        for level in [400, 400, 400, 400, 800] {
            history.push([level; BAND_COUNT]);
        }

        assert_eq!(history.mean(7), 500);
        assert_eq!(history.bands().as_bytes()[7], 12);
    }

    #[test]
    fn test_silence_stays_dark() {
        let mut extractor = SpectrumExtractor::new(DEFAULT_BAND_FREQUENCIES, 48_000);
        let silence = AudioFrame::from_samples(&[0; FFT_SIZE]);

        assert_eq!(extractor.levels(&silence), [50; BAND_COUNT]);
        for _ in 0..8 {
            assert_eq!(extractor.process(&silence), SpectrumBands::default());
        }
    }

    #[test]
    fn test_tone_lights_its_band() {
        let mut extractor = SpectrumExtractor::new(DEFAULT_BAND_FREQUENCIES, 48_000);
        let tone = sine_frame(13, 1.0e9);

        let mut bands = SpectrumBands::default();
        for _ in 0..HISTORY_LEN {
            bands = extractor.process(&tone);
        }

        assert_eq!(bands.as_bytes(), &[0, 0, 0, 18, 0, 0, 0, 0]);
    }

    #[test]
    fn test_clear_resets_history() {
        let mut extractor = SpectrumExtractor::new(DEFAULT_BAND_FREQUENCIES, 48_000);
        extractor.process(&sine_frame(13, 1.0e9));

        extractor.clear();

        assert_eq!(extractor.history(), &BandHistory::new());
    }

    #[test]
    fn test_sample_rate_change_remaps() {
        let mut extractor = SpectrumExtractor::new(DEFAULT_BAND_FREQUENCIES, 48_000);
        extractor.set_sample_rate(44_100);

        assert_eq!(extractor.sample_rate(), 44_100);
        assert_eq!(extractor.bins(), band_bins(&DEFAULT_BAND_FREQUENCIES, 44_100));
    }
}
