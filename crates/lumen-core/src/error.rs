//! Error types for Lumen core.

use thiserror::Error;

/// Core error type for Lumen domain operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid {what} length: expected at least {expected} bytes, got {actual}")]
    InvalidLength { what: &'static str, expected: usize, actual: usize },

    #[error("Pixel ({x}, {y}) is outside the panel")]
    PixelOutOfRange { x: usize, y: usize },

    #[error("Unknown panel mode id: {0}")]
    UnknownMode(u8),
}

/// Result type alias for Lumen core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
