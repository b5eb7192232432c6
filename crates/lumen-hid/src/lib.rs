//! Lumen HID - InWin 309 front panel control.
//!
//! This crate speaks the panel's 65-byte report protocol:
//! - `packet` builds command frames and parses replies
//! - `transport` is the report channel, backed by hidapi on real hardware
//! - `sim` is an in-memory panel for tests and dry runs
//! - `client` serializes exchanges and mirrors the device status

pub mod client;
pub mod error;
pub mod packet;
pub mod sim;
pub mod transport;

pub use client::PanelClient;
pub use error::{HidError, HidResult};
pub use sim::SimulatedPanel;
pub use transport::{HidTransport, Transport};
