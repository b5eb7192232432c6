//! Panel wire format.
//!
//! Every exchange with the panel is a fixed 65-byte output report. Byte 0
//! is the report id, bytes 1-2 select the command and the remaining bytes
//! carry command parameters. Simple commands repeat their opcode in bytes 1
//! and 2; the extended family uses `0xBB` followed by a sub-opcode.

use chrono::{Datelike, Timelike};
use lumen_core::image::IMAGE_LEN;
use lumen_core::status::STATUS_LEN;
use lumen_core::{
    CoreError, HourglassSettings, PANEL_HEIGHT, PanelMode, PanelStatus, Rgb, SpectrumBands,
};

use crate::error::{HidError, HidResult};

/// Size of every frame exchanged with the panel.
pub const FRAME_LEN: usize = 65;
/// Report id carried in byte 0.
pub const REPORT_ID: u8 = 0x01;
/// Opcode prefix of the extended command family.
pub const EXTENDED_PREFIX: u8 = 0xBB;
/// Reply bytes 1-2 of a bare acknowledgment ("OK").
pub const ACK: [u8; 2] = [0x4F, 0x4B];

/// Mode-set opcode is `mode id + MODE_OPCODE_BASE`.
pub const MODE_OPCODE_BASE: u8 = 48;

/// Offset of picture data in image write frames and image read replies.
pub const IMAGE_DATA_OFFSET: usize = 11;
/// Picture bytes carried per image frame.
pub const IMAGE_CHUNK_LEN: usize = PANEL_HEIGHT * Rgb::LEN;
/// Frames per picture, addressed by column on write and by row on read.
pub const IMAGE_CHUNKS: u8 = 8;
/// Frame byte that receives a copy of the last chunk byte.
const IMAGE_CONTROL_IDX: usize = 8;

const SPECTRUM_OFFSET: usize = 3;
const STATUS_UPDATE_OFFSET: usize = 3;

/// Single-byte commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Toggle {
    SpeedUp = 0x03,
    SpeedDown = 0x09,
    FanPwmDown = 0x0F,
    DataSource = 0x1C,
    FanPwmUp = 0x1E,
    LightDown = 0x28,
    LightUp = 0x2A,
    Lamp = 0xAA,
}

impl Toggle {
    const ALL: [Self; 8] = [
        Self::SpeedUp,
        Self::SpeedDown,
        Self::FanPwmDown,
        Self::DataSource,
        Self::FanPwmUp,
        Self::LightDown,
        Self::LightUp,
        Self::Lamp,
    ];

    #[must_use]
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| *t as u8 == opcode)
    }
}

/// Sub-opcodes of the extended command family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Extended {
    StatusQuery = 0x01,
    SetRtc = 0x02,
    HourglassRead = 0x06,
    HourglassWrite = 0x07,
    ImageWrite = 0x08,
    SaveImages = 0x09,
    ImageRead = 0x10,
    Spectrum = 0x11,
    StatusUpdate = 0x13,
    StatusUpdateDefault = 0x14,
}

impl Extended {
    const ALL: [Self; 10] = [
        Self::StatusQuery,
        Self::SetRtc,
        Self::HourglassRead,
        Self::HourglassWrite,
        Self::ImageWrite,
        Self::SaveImages,
        Self::ImageRead,
        Self::Spectrum,
        Self::StatusUpdate,
        Self::StatusUpdateDefault,
    ];

    #[must_use]
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|e| *e as u8 == opcode)
    }
}

/// One output report.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame([u8; FRAME_LEN]);

impl Frame {
    fn blank() -> Self {
        let mut bytes = [0u8; FRAME_LEN];
        bytes[0] = REPORT_ID;
        Self(bytes)
    }

    fn extended(command: Extended) -> Self {
        let mut frame = Self::blank();
        frame.0[1] = EXTENDED_PREFIX;
        frame.0[2] = command as u8;
        frame
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    /// Primary opcode (byte 1).
    #[must_use]
    pub fn opcode(&self) -> u8 {
        self.0[1]
    }

    /// Extended sub-command, if this is an extended frame.
    #[must_use]
    pub fn extended_command(&self) -> Option<Extended> {
        if self.0[1] == EXTENDED_PREFIX { Extended::from_opcode(self.0[2]) } else { None }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Frame({:02x?}..)", &self.0[..12])
    }
}

/// Switch to `mode` using colour variant `color_id`.
#[must_use]
pub fn set_mode(mode: PanelMode, color_id: u8) -> Frame {
    let mut frame = Frame::blank();
    frame.0[1] = mode.id() + MODE_OPCODE_BASE;
    frame.0[2] = color_id;
    frame
}

/// A single-byte command.
#[must_use]
pub fn toggle(command: Toggle) -> Frame {
    let mut frame = Frame::blank();
    frame.0[1] = command as u8;
    frame.0[2] = command as u8;
    frame
}

#[must_use]
pub fn status_query() -> Frame {
    Frame::extended(Extended::StatusQuery)
}

/// Set the panel clock. Most fields are BCD; the day of month is sent
/// as `day + 6` and the weekday counts from Sunday = 0.
#[must_use]
pub fn set_rtc<T: Datelike + Timelike>(now: &T) -> Frame {
    let mut frame = Frame::extended(Extended::SetRtc);
    frame.0[3] = bcd(now.second());
    frame.0[4] = bcd(now.minute());
    frame.0[5] = bcd(now.hour());
    frame.0[6] = u8::try_from(now.weekday().num_days_from_sunday()).unwrap_or_default();
    frame.0[7] = u8::try_from(now.day() + 6).unwrap_or_default();
    frame.0[8] = bcd(now.month());
    frame.0[9] = bcd(u32::try_from(now.year() - 2000).unwrap_or_default());
    frame
}

fn bcd(value: u32) -> u8 {
    let value = u8::try_from(value % 100).unwrap_or_default();
    ((value / 10) << 4) | (value % 10)
}

#[must_use]
pub fn hourglass_read() -> Frame {
    Frame::extended(Extended::HourglassRead)
}

#[must_use]
pub fn hourglass_write(settings: &HourglassSettings) -> Frame {
    let mut frame = Frame::extended(Extended::HourglassWrite);
    frame.0[3] = settings.timeout();
    frame.0[4] = settings.interval();
    frame.0[5] = settings.bitmap_id();
    frame
}

#[must_use]
pub fn spectrum(bands: &SpectrumBands) -> Frame {
    let mut frame = Frame::extended(Extended::Spectrum);
    let bytes = bands.as_bytes();
    frame.0[SPECTRUM_OFFSET..SPECTRUM_OFFSET + bytes.len()].copy_from_slice(bytes);
    frame
}

/// Frame carrying the `column`-th 54-byte slice of a serialized image.
#[must_use]
pub fn image_chunk(picture_id: u8, column: u8, image: &[u8; IMAGE_LEN]) -> Frame {
    let mut frame = Frame::extended(Extended::ImageWrite);
    frame.0[3] = picture_id;
    frame.0[4] = column;

    let start = usize::from(column) * IMAGE_CHUNK_LEN;
    frame.0[IMAGE_DATA_OFFSET..].copy_from_slice(&image[start..start + IMAGE_CHUNK_LEN]);
    // Unknown purpose; the panel expects the final data byte mirrored here.
    frame.0[IMAGE_CONTROL_IDX] = frame.0[FRAME_LEN - 1];
    frame
}

#[must_use]
pub fn image_read(picture_id: u8, row: u8) -> Frame {
    let mut frame = Frame::extended(Extended::ImageRead);
    frame.0[3] = picture_id;
    frame.0[4] = row;
    frame
}

#[must_use]
pub fn save_images() -> Frame {
    Frame::extended(Extended::SaveImages)
}

/// Push the cached status back to the device, optionally as the power-on default.
#[must_use]
pub fn status_update(status: &PanelStatus, as_default: bool) -> Frame {
    let command = if as_default { Extended::StatusUpdateDefault } else { Extended::StatusUpdate };
    let mut frame = Frame::extended(command);
    let payload = status.update_payload();
    frame.0[STATUS_UPDATE_OFFSET..STATUS_UPDATE_OFFSET + payload.len()].copy_from_slice(payload);
    frame
}

/// Whether `reply` is a bare acknowledgment.
#[must_use]
pub fn is_ack(reply: &[u8]) -> bool {
    reply.get(1..3) == Some(&ACK[..])
}

/// Parse a status query reply.
///
/// # Errors
/// Returns [`HidError::ShortReply`] if the reply cannot hold a status block.
pub fn parse_status(reply: &[u8]) -> HidResult<PanelStatus> {
    PanelStatus::from_bytes(reply).map_err(|e| short_reply("status query", e))
}

/// Parse an hourglass read reply.
///
/// # Errors
/// Returns [`HidError::ShortReply`] if the reply cannot hold the settings.
pub fn parse_hourglass(reply: &[u8]) -> HidResult<HourglassSettings> {
    HourglassSettings::from_bytes(reply).map_err(|e| short_reply("hourglass read", e))
}

/// Status carried by a spectrum write reply, if any.
///
/// Empty, truncated and acknowledgment replies carry no status.
#[must_use]
pub fn spectrum_status(reply: &[u8]) -> Option<PanelStatus> {
    if reply.len() < STATUS_LEN || is_ack(reply) {
        return None;
    }
    PanelStatus::from_bytes(reply).ok()
}

/// Picture bytes of an image read reply.
///
/// # Errors
/// Returns [`HidError::ShortReply`] if the reply is truncated.
pub fn parse_image_row(reply: &[u8]) -> HidResult<&[u8]> {
    let end = IMAGE_DATA_OFFSET + IMAGE_CHUNK_LEN;
    reply.get(IMAGE_DATA_OFFSET..end).ok_or(HidError::ShortReply {
        command: "image read",
        expected: end,
        actual: reply.len(),
    })
}

fn short_reply(command: &'static str, error: CoreError) -> HidError {
    match error {
        CoreError::InvalidLength { expected, actual, .. } => {
            HidError::ShortReply { command, expected, actual }
        }
        other => HidError::Core(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::NaiveDate;
    use lumen_core::PixelImage;

    #[test]
    fn test_frames_carry_report_id() {
        for frame in [status_query(), toggle(Toggle::Lamp), set_mode(PanelMode::Sky, 1)] {
            assert_eq!(frame.as_bytes().len(), FRAME_LEN);
            assert_eq!(frame.as_bytes()[0], REPORT_ID);
        }
    }

    #[test]
    fn test_toggle_repeats_opcode() {
        let cases = [
            (Toggle::SpeedUp, 0x03),
            (Toggle::SpeedDown, 0x09),
            (Toggle::LightUp, 0x2A),
            (Toggle::LightDown, 0x28),
            (Toggle::FanPwmUp, 0x1E),
            (Toggle::FanPwmDown, 0x0F),
            (Toggle::Lamp, 0xAA),
            (Toggle::DataSource, 0x1C),
        ];
        for (command, opcode) in cases {
            let frame = toggle(command);
            assert_eq!(&frame.as_bytes()[1..4], &[opcode, opcode, 0]);
            assert_eq!(Toggle::from_opcode(opcode), Some(command));
        }
    }

    #[test]
    fn test_mode_opcode_offset() {
        let frame = set_mode(PanelMode::AudioSpectrum, 2);
        assert_eq!(&frame.as_bytes()[1..4], &[51, 2, 0]);
        assert_eq!(set_mode(PanelMode::Image, 0).opcode(), 59);
    }

    #[test]
    fn test_extended_opcodes() {
        assert_eq!(&status_query().as_bytes()[1..3], &[0xBB, 0x01]);
        assert_eq!(&save_images().as_bytes()[1..3], &[0xBB, 0x09]);
        assert_eq!(&hourglass_read().as_bytes()[1..3], &[0xBB, 0x06]);
        assert_eq!(image_read(0, 0).extended_command(), Some(Extended::ImageRead));
        assert_eq!(toggle(Toggle::Lamp).extended_command(), None);
    }

    #[test]
    fn test_rtc_is_bcd() {
        // 2024-03-17 was a Sunday.
        let now = NaiveDate::from_ymd_opt(2024, 3, 17)
            .and_then(|d| d.and_hms_opt(23, 45, 59))
            .expect("valid date");
        let frame = set_rtc(&now);
        assert_eq!(&frame.as_bytes()[1..10], &[0xBB, 0x02, 0x59, 0x45, 0x23, 0, 17 + 6, 0x03, 0x24]);
    }

    #[test]
    fn test_hourglass_write_layout() {
        let frame = hourglass_write(&HourglassSettings::new(30, 5, 2));
        assert_eq!(&frame.as_bytes()[1..6], &[0xBB, 0x07, 30, 5, 2]);
    }

    #[test]
    fn test_spectrum_layout() {
        let frame = spectrum(&SpectrumBands::new([1, 2, 3, 4, 5, 6, 7, 8]));
        assert_eq!(&frame.as_bytes()[1..12], &[0xBB, 0x11, 1, 2, 3, 4, 5, 6, 7, 8, 0]);
    }

    #[test]
    fn test_image_chunks_reassemble() {
        let image = PixelImage::from_fn(|x, y| {
            let v = u8::try_from(y * 8 + x).unwrap();
            Rgb::new(v, v.wrapping_mul(3), !v)
        });
        let bytes = image.to_bytes();

        let mut reassembled = Vec::with_capacity(IMAGE_LEN);
        for column in 0..IMAGE_CHUNKS {
            let frame = image_chunk(4, column, &bytes);
            let raw = frame.as_bytes();
            assert_eq!(&raw[1..5], &[0xBB, 0x08, 4, column]);
            assert_eq!(raw[IMAGE_CONTROL_IDX], raw[FRAME_LEN - 1]);
            reassembled.extend_from_slice(&raw[IMAGE_DATA_OFFSET..]);
        }
        assert_eq!(reassembled, bytes.to_vec());
        assert_eq!(usize::from(IMAGE_CHUNKS) * IMAGE_CHUNK_LEN, IMAGE_LEN);
    }

    #[test]
    fn test_status_update_copies_payload() {
        let mut status = PanelStatus::new();
        status.set_mode(PanelMode::Candle);
        status.set_data_source(1);
        let frame = status_update(&status, false);
        assert_eq!(&frame.as_bytes()[1..3], &[0xBB, 0x13]);
        assert_eq!(frame.as_bytes()[3], 2);
        assert_eq!(frame.as_bytes()[3 + 20], 1);
        assert_eq!(status_update(&status, true).as_bytes()[2], 0x14);
    }

    #[test]
    fn test_ack_detection() {
        assert!(is_ack(&[0x01, 0x4F, 0x4B, 0, 0]));
        assert!(!is_ack(&[0x01, 0x4F]));
        assert!(!is_ack(&[]));
    }

    #[test]
    fn test_spectrum_reply_handling() {
        let mut reply = vec![0u8; FRAME_LEN];
        reply[1] = 4;
        assert_eq!(spectrum_status(&reply).and_then(|s| s.mode()), Some(PanelMode::AudioSpectrum));

        reply[1..3].copy_from_slice(&ACK);
        assert_eq!(spectrum_status(&reply), None);
        assert_eq!(spectrum_status(&[]), None);
        assert_eq!(spectrum_status(&[1, 2, 3]), None);
    }

    #[test]
    fn test_short_replies_are_integrity_errors() {
        assert_matches!(
            parse_status(&[1, 2, 3]),
            Err(HidError::ShortReply { command: "status query", expected: 24, actual: 3 })
        );
        assert_matches!(parse_hourglass(&[]), Err(HidError::ShortReply { .. }));
        assert_matches!(parse_image_row(&[0u8; 64]), Err(HidError::ShortReply { expected: 65, .. }));
    }
}
