//! HID error types.

use lumen_core::CoreError;
use thiserror::Error;

/// HID error type.
#[derive(Debug, Error)]
pub enum HidError {
    #[error("Panel not found (vid {vendor_id:04x}, pid {product_id:04x})")]
    DeviceNotFound { vendor_id: u16, product_id: u16 },

    #[error("Panel is not connected")]
    NotConnected,

    #[error("Panel client is closing")]
    Closed,

    #[error("Short reply to {command}: expected {expected} bytes, got {actual}")]
    ShortReply { command: &'static str, expected: usize, actual: usize },

    #[error("{what} did not reach {target} after {steps} steps - device unresponsive")]
    Unresponsive { what: &'static str, target: u8, steps: u8 },

    #[error("{what} {value} is outside {min}-{max}")]
    OutOfRange { what: &'static str, value: u8, min: u8, max: u8 },

    #[error("HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for HID operations.
pub type HidResult<T> = Result<T, HidError>;
