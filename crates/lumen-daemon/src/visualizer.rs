//! Spectrum visualizer: loopback audio in, panel bands out.

use std::sync::Arc;

use lumen_audio::{AudioResult, AudioSource, CaptureBuffer, SpectrumExtractor};
use lumen_core::{BAND_COUNT, PanelMode};
use lumen_hid::{HidResult, PanelClient};
use tracing::{debug, info, warn};

/// Outcome of one visualizer cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Nothing to send this cycle.
    Idle,
    /// Bands were written to the panel.
    Sent,
    /// The panel is no longer in spectrum mode; capture was stopped.
    LeftSpectrumMode,
}

pub struct Visualizer {
    panel: Arc<PanelClient>,
    source: Box<dyn AudioSource>,
    buffer: Arc<CaptureBuffer>,
    extractor: SpectrumExtractor,
    running: bool,
}

impl Visualizer {
    pub fn new(
        panel: Arc<PanelClient>,
        source: Box<dyn AudioSource>,
        band_frequencies: [u32; BAND_COUNT],
    ) -> Self {
        Self {
            panel,
            source,
            buffer: Arc::new(CaptureBuffer::new()),
            extractor: SpectrumExtractor::new(band_frequencies, 0),
            running: false,
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// (Re)start capture on the current default playback device.
    ///
    /// Returns `false` if there is no playback device; the visualizer then
    /// stays stopped.
    ///
    /// # Errors
    /// Returns an error if the device exists but capture cannot start.
    pub fn start(&mut self) -> AudioResult<bool> {
        self.stop();

        let Some(output) = self.source.default_output()? else {
            info!("No default output device, visualizer idle");
            return Ok(false);
        };
        let Some(format) = self.source.start_capture(Arc::clone(&self.buffer))? else {
            info!(output = %output.name, "No capture source for output, visualizer idle");
            return Ok(false);
        };

        self.extractor.set_sample_rate(format.sample_rate);
        self.running = true;
        info!(output = %output.name, sample_rate = format.sample_rate, "Visualizer started");
        Ok(true)
    }

    /// Halt capture and forget all buffered audio and band history.
    pub fn stop(&mut self) {
        if self.running {
            info!("Visualizer stopped");
        }
        self.running = false;
        self.source.stop_capture();
        self.buffer.reset();
        self.extractor.clear();
    }

    /// Run one cycle.
    ///
    /// # Errors
    /// Returns an error if the spectrum write fails.
    pub async fn tick(&mut self) -> HidResult<Tick> {
        if !self.running {
            return Ok(Tick::Idle);
        }
        let Some(frame) = self.buffer.take() else {
            return Ok(Tick::Idle);
        };
        let bands = self.extractor.process(&frame);

        if self.panel.mode() != Some(PanelMode::AudioSpectrum) {
            self.stop();
            return Ok(Tick::LeftSpectrumMode);
        }

        if self.source.default_changed() {
            debug!("Default output changed, restarting capture");
            if let Err(e) = self.start() {
                warn!(error = %e, "Failed to restart capture");
            }
            if !self.running {
                return Ok(Tick::Idle);
            }
        }

        self.panel.write_spectrum(&bands).await?;
        Ok(Tick::Sent)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lumen_audio::capture::FRAME_BYTES;
    use lumen_audio::spectrum::{DEFAULT_BAND_FREQUENCIES, band_bins};
    use lumen_audio::{CaptureFormat, OutputDevice};
    use lumen_core::PanelStatus;
    use lumen_hid::SimulatedPanel;
    use parking_lot::Mutex;

    #[derive(Default)]
    pub(crate) struct FakeState {
        pub format: Option<CaptureFormat>,
        pub buffer: Option<Arc<CaptureBuffer>>,
        pub starts: usize,
        pub stops: usize,
        pub changed: bool,
        /// The output exists but offers nothing to capture from.
        pub no_source: bool,
    }

    /// Audio source whose device and callbacks are driven by the test.
    #[derive(Clone, Default)]
    pub(crate) struct FakeSource(pub Arc<Mutex<FakeState>>);

    impl FakeSource {
        pub fn with_device(sample_rate: u32) -> Self {
            let source = Self::default();
            source.0.lock().format = Some(CaptureFormat { sample_rate, channels: 2 });
            source
        }

        /// Deliver one full period through the capture callback.
        pub fn feed(&self) -> bool {
            let buffer = self.0.lock().buffer.clone();
            buffer.is_some_and(|b| b.push(&[0u8; FRAME_BYTES]))
        }
    }

    impl AudioSource for FakeSource {
        fn default_output(&mut self) -> AudioResult<Option<OutputDevice>> {
            Ok(self.0.lock().format.map(|_| OutputDevice { name: "speakers".to_string() }))
        }

        fn start_capture(
            &mut self,
            buffer: Arc<CaptureBuffer>,
        ) -> AudioResult<Option<CaptureFormat>> {
            let mut state = self.0.lock();
            let format = state.format.filter(|_| !state.no_source);
            if format.is_some() {
                state.starts += 1;
                state.buffer = Some(buffer);
            }
            Ok(format)
        }

        /// A callback already in flight lands one last period before the
        /// stream goes away.
        fn stop_capture(&mut self) {
            let mut state = self.0.lock();
            state.stops += 1;
            if let Some(buffer) = state.buffer.take() {
                buffer.push(&[0u8; FRAME_BYTES]);
            }
        }

        fn default_changed(&mut self) -> bool {
            std::mem::take(&mut self.0.lock().changed)
        }
    }

    pub(crate) fn spectrum_status() -> PanelStatus {
        let mut status = PanelStatus::new();
        status.set_mode(PanelMode::AudioSpectrum);
        status
    }

    async fn client_for(panel: &SimulatedPanel) -> Arc<PanelClient> {
        let client = PanelClient::new(panel.clone());
        client.load_status().await.expect("Failed to load status");
        Arc::new(client)
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_device_stays_idle() {
        let panel = SimulatedPanel::with_status(spectrum_status());
        let source = FakeSource::default();
        let mut visualizer =
            Visualizer::new(client_for(&panel).await, Box::new(source.clone()), DEFAULT_BAND_FREQUENCIES);

        assert!(!visualizer.start().unwrap());
        assert!(!visualizer.is_running());
        assert_eq!(visualizer.tick().await.unwrap(), Tick::Idle);
        assert_eq!(panel.last_spectrum(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_maps_bands_for_device_rate() {
        let panel = SimulatedPanel::with_status(spectrum_status());
        let source = FakeSource::with_device(44_100);
        let mut visualizer =
            Visualizer::new(client_for(&panel).await, Box::new(source.clone()), DEFAULT_BAND_FREQUENCIES);

        assert!(visualizer.start().unwrap());

        assert!(visualizer.is_running());
        assert_eq!(visualizer.extractor.bins(), band_bins(&DEFAULT_BAND_FREQUENCIES, 44_100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_is_forwarded_in_spectrum_mode() {
        let panel = SimulatedPanel::with_status(spectrum_status());
        let source = FakeSource::with_device(48_000);
        let mut visualizer =
            Visualizer::new(client_for(&panel).await, Box::new(source.clone()), DEFAULT_BAND_FREQUENCIES);
        visualizer.start().unwrap();

        assert_eq!(visualizer.tick().await.unwrap(), Tick::Idle);

        assert!(source.feed());
        assert_eq!(visualizer.tick().await.unwrap(), Tick::Sent);
        assert_eq!(panel.last_spectrum(), Some(lumen_core::SpectrumBands::default()));
        assert_eq!(visualizer.tick().await.unwrap(), Tick::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaving_spectrum_mode_stops_capture() {
        let panel = SimulatedPanel::new();
        let source = FakeSource::with_device(48_000);
        let mut visualizer =
            Visualizer::new(client_for(&panel).await, Box::new(source.clone()), DEFAULT_BAND_FREQUENCIES);
        visualizer.start().unwrap();
        let stops = source.0.lock().stops;

        source.feed();
        assert_eq!(visualizer.tick().await.unwrap(), Tick::LeftSpectrumMode);

        assert!(!visualizer.is_running());
        assert_eq!(source.0.lock().stops, stops + 1);
        assert_eq!(visualizer.extractor.history(), &lumen_audio::BandHistory::new());
        assert!(!visualizer.buffer.is_pending());
        assert_eq!(panel.last_spectrum(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_device_change_restarts_capture() {
        let panel = SimulatedPanel::with_status(spectrum_status());
        let source = FakeSource::with_device(48_000);
        let mut visualizer =
            Visualizer::new(client_for(&panel).await, Box::new(source.clone()), DEFAULT_BAND_FREQUENCIES);
        visualizer.start().unwrap();

        source.feed();
        {
            let mut state = source.0.lock();
            state.changed = true;
            state.format = Some(CaptureFormat { sample_rate: 96_000, channels: 2 });
        }

        assert_eq!(visualizer.tick().await.unwrap(), Tick::Sent);
        assert_eq!(source.0.lock().starts, 2);
        assert_eq!(visualizer.extractor.sample_rate(), 96_000);
        assert!(visualizer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_pending_audio() {
        let panel = SimulatedPanel::with_status(spectrum_status());
        let source = FakeSource::with_device(48_000);
        let mut visualizer =
            Visualizer::new(client_for(&panel).await, Box::new(source.clone()), DEFAULT_BAND_FREQUENCIES);
        visualizer.start().unwrap();
        source.feed();

        visualizer.stop();

        assert!(!visualizer.buffer.is_pending());
        assert_eq!(visualizer.tick().await.unwrap(), Tick::Idle);
        assert_eq!(panel.last_spectrum(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_without_capture_source_stays_idle() {
        let panel = SimulatedPanel::with_status(spectrum_status());
        let source = FakeSource::with_device(48_000);
        source.0.lock().no_source = true;
        let mut visualizer =
            Visualizer::new(client_for(&panel).await, Box::new(source.clone()), DEFAULT_BAND_FREQUENCIES);

        assert!(!visualizer.start().unwrap());
        assert!(!visualizer.is_running());
        assert_eq!(source.0.lock().starts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_restart_skips_write() {
        let panel = SimulatedPanel::with_status(spectrum_status());
        let source = FakeSource::with_device(48_000);
        let mut visualizer =
            Visualizer::new(client_for(&panel).await, Box::new(source.clone()), DEFAULT_BAND_FREQUENCIES);
        visualizer.start().unwrap();

        source.feed();
        {
            let mut state = source.0.lock();
            state.changed = true;
            state.format = None;
        }

        assert_eq!(visualizer.tick().await.unwrap(), Tick::Idle);
        assert!(!visualizer.is_running());
        assert_eq!(panel.last_spectrum(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_audio_from_last_callback() {
        let panel = SimulatedPanel::with_status(spectrum_status());
        let source = FakeSource::with_device(48_000);
        let mut visualizer =
            Visualizer::new(client_for(&panel).await, Box::new(source.clone()), DEFAULT_BAND_FREQUENCIES);
        visualizer.start().unwrap();

        visualizer.stop();
        assert!(!visualizer.buffer.is_pending());

        visualizer.start().unwrap();
        assert_eq!(visualizer.tick().await.unwrap(), Tick::Idle);
        assert_eq!(panel.last_spectrum(), None);
    }
}
