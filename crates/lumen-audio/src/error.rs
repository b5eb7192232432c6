//! Audio error types.

use thiserror::Error;

/// Audio error type.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Failed to query device name: {0}")]
    DeviceName(#[from] cpal::DeviceNameError),

    #[error("Failed to list input devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("Failed to query device format: {0}")]
    StreamConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("Failed to build loopback stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("Failed to start loopback stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("Audio runtime error: {0}")]
    Runtime(String),
}

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;
