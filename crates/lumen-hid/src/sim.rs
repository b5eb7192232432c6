//! In-memory panel.
//!
//! Answers the wire protocol the way the hardware does, which lets the
//! daemon run without a panel attached and gives tests a device whose
//! state actually moves in response to commands.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use lumen_core::image::IMAGE_LEN;
use lumen_core::status::STATUS_LEN;
use lumen_core::{HourglassSettings, PanelMode, PanelStatus, PixelImage, SpectrumBands, BAND_COUNT};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::HidResult;
use crate::packet::{
    ACK, Extended, FRAME_LEN, Frame, IMAGE_CHUNK_LEN, IMAGE_DATA_OFFSET, MODE_OPCODE_BASE,
    REPORT_ID, Toggle,
};
use crate::transport::Transport;

/// Most recent frames kept for inspection.
pub const SENT_LOG_LEN: usize = 256;

/// A simulated panel. Clones share the same device state.
#[derive(Clone, Default)]
pub struct SimulatedPanel {
    state: Arc<Mutex<SimState>>,
}

struct SimState {
    status: PanelStatus,
    hourglass: HourglassSettings,
    pictures: HashMap<u8, [u8; IMAGE_LEN]>,
    clock: Option<[u8; 7]>,
    spectrum: Option<SpectrumBands>,
    saves: usize,
    sent: VecDeque<Frame>,
    /// Ignore speed/light/fan steps.
    stuck: bool,
    /// Answer spectrum writes with a status block instead of an ack.
    spectrum_replies_status: bool,
    /// Truncate every reply to this many bytes.
    reply_limit: Option<usize>,
}

impl Default for SimState {
    fn default() -> Self {
        let mut status = PanelStatus::new();
        status.set_mode(PanelMode::Candle);
        for _ in 0..3 {
            status.step_speed(false);
        }
        status.set_fan_pwm(6);

        Self {
            status,
            hourglass: HourglassSettings::new(30, 1, 0),
            pictures: HashMap::new(),
            clock: None,
            spectrum: None,
            saves: 0,
            sent: VecDeque::with_capacity(SENT_LOG_LEN),
            stuck: false,
            spectrum_replies_status: false,
            reply_limit: None,
        }
    }
}

impl SimulatedPanel {
    /// Create a panel in its factory state (candle mode, speed 3, full light).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a panel reporting `status`.
    #[must_use]
    pub fn with_status(status: PanelStatus) -> Self {
        let panel = Self::default();
        panel.set_status(status);
        panel
    }

    /// Status as the device holds it.
    #[must_use]
    pub fn status(&self) -> PanelStatus {
        self.state.lock().status
    }

    /// Change device state behind the client's back, like the front-panel buttons do.
    pub fn set_status(&self, status: PanelStatus) {
        self.state.lock().status = status;
    }

    #[must_use]
    pub fn hourglass(&self) -> HourglassSettings {
        self.state.lock().hourglass
    }

    /// Picture stored in slot `id`, if anything was written there.
    #[must_use]
    pub fn picture(&self, id: u8) -> Option<PixelImage> {
        let state = self.state.lock();
        state.pictures.get(&id).and_then(|bytes| PixelImage::from_bytes(bytes).ok())
    }

    /// Put a picture into slot `id` directly.
    pub fn store_picture(&self, id: u8, image: &PixelImage) {
        self.state.lock().pictures.insert(id, image.to_bytes());
    }

    /// Raw clock bytes of the last RTC command.
    #[must_use]
    pub fn clock(&self) -> Option<[u8; 7]> {
        self.state.lock().clock
    }

    /// Bands of the last spectrum write.
    #[must_use]
    pub fn last_spectrum(&self) -> Option<SpectrumBands> {
        self.state.lock().spectrum
    }

    /// Number of save-images commands received.
    #[must_use]
    pub fn saves(&self) -> usize {
        self.state.lock().saves
    }

    /// Frames received so far, oldest first. Only the last
    /// [`SENT_LOG_LEN`] are kept.
    #[must_use]
    pub fn sent(&self) -> Vec<Frame> {
        self.state.lock().sent.iter().cloned().collect()
    }

    pub fn clear_sent(&self) {
        self.state.lock().sent.clear();
    }

    /// Stop reacting to speed, light and fan PWM steps.
    pub fn set_stuck(&self, stuck: bool) {
        self.state.lock().stuck = stuck;
    }

    /// Answer spectrum writes with a status block instead of an acknowledgment.
    pub fn set_spectrum_replies_status(&self, enabled: bool) {
        self.state.lock().spectrum_replies_status = enabled;
    }

    /// Truncate replies to `limit` bytes (`None` for full replies).
    pub fn set_reply_limit(&self, limit: Option<usize>) {
        self.state.lock().reply_limit = limit;
    }
}

impl Transport for SimulatedPanel {
    fn write(&mut self, frame: &Frame) -> HidResult<()> {
        self.state.lock().handle(frame);
        Ok(())
    }

    fn write_and_read(&mut self, frame: &Frame) -> HidResult<Vec<u8>> {
        Ok(self.state.lock().handle(frame))
    }
}

impl SimState {
    fn handle(&mut self, frame: &Frame) -> Vec<u8> {
        if self.sent.len() == SENT_LOG_LEN {
            self.sent.pop_front();
        }
        self.sent.push_back(frame.clone());

        let mut reply = match frame.extended_command() {
            Some(command) => self.handle_extended(command, frame.as_bytes()),
            None => {
                self.handle_simple(frame.as_bytes());
                ack()
            }
        };

        if let Some(limit) = self.reply_limit {
            reply.truncate(limit);
        }
        reply
    }

    fn handle_simple(&mut self, bytes: &[u8; FRAME_LEN]) {
        let opcode = bytes[1];

        if let Some(toggle) = Toggle::from_opcode(opcode) {
            debug!(?toggle, "Simulated toggle");
            let status = &mut self.status;
            match toggle {
                Toggle::Lamp => status.toggle_lamp(),
                Toggle::DataSource => status.toggle_data_source(),
                _ if self.stuck => {}
                Toggle::SpeedUp => status.step_speed(true),
                Toggle::SpeedDown => status.step_speed(false),
                Toggle::LightUp => status.step_light(true),
                Toggle::LightDown => status.step_light(false),
                Toggle::FanPwmUp => status.step_fan_pwm(true),
                Toggle::FanPwmDown => status.step_fan_pwm(false),
            }
            return;
        }

        match opcode.checked_sub(MODE_OPCODE_BASE).and_then(PanelMode::from_id) {
            Some(mode) => {
                debug!(%mode, color_id = bytes[2], "Simulated mode change");
                self.status.set_mode_color_id(mode, bytes[2]);
                self.status.set_mode(mode);
            }
            None => warn!(opcode, "Simulated panel ignored unknown opcode"),
        }
    }

    fn handle_extended(&mut self, command: Extended, bytes: &[u8; FRAME_LEN]) -> Vec<u8> {
        match command {
            Extended::StatusQuery => return self.status_reply(),
            Extended::SetRtc => {
                let mut clock = [0u8; 7];
                clock.copy_from_slice(&bytes[3..10]);
                self.clock = Some(clock);
            }
            Extended::HourglassRead => {
                let mut reply = vec![0u8; FRAME_LEN];
                reply[1] = self.hourglass.timeout();
                reply[2] = self.hourglass.interval();
                reply[3] = self.hourglass.bitmap_id();
                return reply;
            }
            Extended::HourglassWrite => {
                self.hourglass = HourglassSettings::new(bytes[3], bytes[4], bytes[5]);
            }
            Extended::ImageWrite => {
                let column = usize::from(bytes[4]);
                if let Some(start) = chunk_start(column) {
                    let picture = self.pictures.entry(bytes[3]).or_insert([0u8; IMAGE_LEN]);
                    picture[start..start + IMAGE_CHUNK_LEN]
                        .copy_from_slice(&bytes[IMAGE_DATA_OFFSET..]);
                }
            }
            Extended::SaveImages => self.saves += 1,
            Extended::ImageRead => {
                let mut reply = vec![0u8; FRAME_LEN];
                reply[0] = REPORT_ID;
                if let (Some(picture), Some(start)) =
                    (self.pictures.get(&bytes[3]), chunk_start(usize::from(bytes[4])))
                {
                    reply[IMAGE_DATA_OFFSET..]
                        .copy_from_slice(&picture[start..start + IMAGE_CHUNK_LEN]);
                }
                return reply;
            }
            Extended::Spectrum => {
                let mut bands = [0u8; BAND_COUNT];
                bands.copy_from_slice(&bytes[3..3 + BAND_COUNT]);
                self.spectrum = Some(SpectrumBands::new(bands));
                if self.spectrum_replies_status {
                    return self.status_reply();
                }
            }
            Extended::StatusUpdate | Extended::StatusUpdateDefault => {
                let mut block = *self.status.as_bytes();
                block[1..STATUS_LEN - 1].copy_from_slice(&bytes[3..STATUS_LEN + 1]);
                if let Ok(status) = PanelStatus::from_bytes(&block) {
                    self.status = status;
                }
            }
        }
        ack()
    }

    fn status_reply(&self) -> Vec<u8> {
        let mut reply = vec![0u8; FRAME_LEN];
        reply[..STATUS_LEN].copy_from_slice(self.status.as_bytes());
        reply[0] = REPORT_ID;
        reply
    }
}

fn ack() -> Vec<u8> {
    let mut reply = vec![0u8; FRAME_LEN];
    reply[0] = REPORT_ID;
    reply[1..3].copy_from_slice(&ACK);
    reply
}

fn chunk_start(index: usize) -> Option<usize> {
    let start = index * IMAGE_CHUNK_LEN;
    (start + IMAGE_CHUNK_LEN <= IMAGE_LEN).then_some(start)
}
