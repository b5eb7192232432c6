//! Lumen daemon internals: configuration, panel routines and the spectrum
//! visualizer loop driven by the `lumen-daemon` binary.

pub mod config;
pub mod routine;
pub mod signals;
pub mod visualizer;
