//! Report channel to the panel.

use hidapi::{HidApi, HidDevice};
use tracing::{debug, info};

use crate::error::{HidError, HidResult};
use crate::packet::{FRAME_LEN, Frame};

/// InWin USB Vendor ID
pub const INWIN_VID: u16 = 0xFF00;
/// 309 front panel USB Product ID
pub const PANEL_PID: u16 = 0x020C;
/// Vendor-defined HID usage page of the control interface
pub const PANEL_USAGE_PAGE: u16 = 0xFF00;

/// How long to wait for a reply before treating it as empty.
const READ_TIMEOUT_MS: i32 = 1000;

/// A reliable, ordered report channel.
///
/// Implementations block until the report has been handed to the OS.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send {
    /// Send one frame without waiting for a reply.
    ///
    /// # Errors
    /// Returns an error if the report could not be written.
    fn write(&mut self, frame: &Frame) -> HidResult<()>;

    /// Send one frame and return the reply report. An empty reply means
    /// the device answered nothing.
    ///
    /// # Errors
    /// Returns an error if the report could not be written or read.
    fn write_and_read(&mut self, frame: &Frame) -> HidResult<Vec<u8>>;
}

/// Transport over a hidraw / Windows HID handle.
pub struct HidTransport {
    device: HidDevice,
}

impl HidTransport {
    /// Open the first HID interface matching the given ids.
    ///
    /// # Errors
    /// Returns an error if no matching interface exists or it cannot be opened.
    pub fn open(vendor_id: u16, product_id: u16, usage_page: u16) -> HidResult<Self> {
        let api = HidApi::new()?;

        let entry = api
            .device_list()
            .find(|d| {
                d.vendor_id() == vendor_id
                    && d.product_id() == product_id
                    && d.usage_page() == usage_page
            })
            .ok_or(HidError::DeviceNotFound { vendor_id, product_id })?;

        let device = api.open_path(entry.path())?;
        info!(vendor_id, product_id, path = ?entry.path(), "Panel opened");

        Ok(Self { device })
    }
}

impl Transport for HidTransport {
    fn write(&mut self, frame: &Frame) -> HidResult<()> {
        let written = self.device.write(frame.as_bytes())?;
        debug!(opcode = frame.opcode(), written, "Report written");
        Ok(())
    }

    fn write_and_read(&mut self, frame: &Frame) -> HidResult<Vec<u8>> {
        self.write(frame)?;

        let mut reply = vec![0u8; FRAME_LEN];
        let read = self.device.read_timeout(&mut reply, READ_TIMEOUT_MS)?;
        reply.truncate(read);
        debug!(opcode = frame.opcode(), read, "Reply read");
        Ok(reply)
    }
}
