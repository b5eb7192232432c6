//! Lumen Core - Domain types for the InWin 309 front panel.
//!
//! This crate contains the data model shared by the device protocol layer,
//! the audio pipeline and the daemon. Nothing in here performs I/O.

pub mod error;
pub mod image;
pub mod mode;
pub mod spectrum;
pub mod status;

pub use error::{CoreError, CoreResult};
pub use image::{PixelImage, Rgb};
pub use mode::PanelMode;
pub use spectrum::{BAND_COUNT, SpectrumBands};
pub use status::{HourglassSettings, PanelStatus};

/// Number of LED columns on the panel.
pub const PANEL_WIDTH: usize = 8;
/// Number of LED rows on the panel.
pub const PANEL_HEIGHT: usize = 18;
