//! Lumen audio - turns what the machine is playing into panel bands.
//!
//! - `capture` hands raw periods from the audio callback to the visualizer
//! - `spectrum` turns one captured frame into eight smoothed band levels
//! - `source` owns the loopback stream on its own thread

pub mod capture;
pub mod error;
pub mod source;
pub mod spectrum;

pub use capture::{AudioFrame, CaptureBuffer};
pub use error::{AudioError, AudioResult};
pub use source::{AudioSource, CaptureFormat, CpalLoopback, OutputDevice};
pub use spectrum::{BandHistory, SpectrumExtractor};
