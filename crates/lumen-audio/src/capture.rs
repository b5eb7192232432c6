//! Double-buffered handoff between the audio callback and the visualizer.
//!
//! Two slots are selected by a write toggle and a read toggle. The producer
//! only fills the slot under the write toggle while both toggles agree, so
//! at most one completed frame is ever waiting for the consumer. Anything
//! the producer cannot place is dropped; it never waits on the consumer.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::trace;

/// Samples per captured frame.
pub const FRAME_SAMPLES: usize = 2048;
/// Bytes per sample (little-endian `i32`).
pub const SAMPLE_BYTES: usize = 4;
/// Bytes per captured frame.
pub const FRAME_BYTES: usize = FRAME_SAMPLES * SAMPLE_BYTES;

/// One completed capture window of raw little-endian `i32` samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    bytes: Vec<u8>,
}

impl AudioFrame {
    /// Wrap raw sample bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self { bytes: bytes.to_vec() }
    }

    /// Build a frame from samples.
    #[must_use]
    pub fn from_samples(samples: &[i32]) -> Self {
        Self { bytes: samples.iter().flat_map(|s| s.to_le_bytes()).collect() }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Decoded samples, in capture order.
    pub fn samples(&self) -> impl Iterator<Item = i32> + '_ {
        self.bytes
            .chunks_exact(SAMPLE_BYTES)
            .map(|chunk| chunk.try_into().map_or(0, i32::from_le_bytes))
    }
}

/// Two-slot capture buffer shared by the audio callback and the consumer.
#[derive(Debug)]
pub struct CaptureBuffer {
    slots: [Mutex<Vec<u8>>; 2],
    write: AtomicUsize,
    read: AtomicUsize,
}

impl Default for CaptureBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: [
                Mutex::new(Vec::with_capacity(FRAME_BYTES)),
                Mutex::new(Vec::with_capacity(FRAME_BYTES)),
            ],
            write: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
        }
    }

    /// Append callback data to the current write slot.
    ///
    /// Returns `false` when the data was dropped because the consumer has
    /// not taken the previous frame yet. Bytes past the end of a frame are
    /// discarded; the write toggle flips once the slot holds a full frame.
    pub fn push(&self, data: &[u8]) -> bool {
        let write = self.write.load(Ordering::Acquire);
        if write != self.read.load(Ordering::Acquire) {
            return false;
        }

        let Some(mut slot) = self.slots[write].try_lock() else {
            return false;
        };

        let take = (FRAME_BYTES - slot.len()).min(data.len());
        slot.extend_from_slice(&data[..take]);

        if slot.len() == FRAME_BYTES {
            drop(slot);
            self.write.store(write ^ 1, Ordering::Release);
            trace!(slot = write, "Capture frame complete");
        }
        true
    }

    /// Take the completed frame, if the producer has flipped since the last call.
    pub fn take(&self) -> Option<AudioFrame> {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        if write == read {
            return None;
        }

        let frame = {
            let mut slot = self.slots[read].lock();
            let frame = AudioFrame::from_bytes(&slot);
            slot.clear();
            frame
        };
        self.read.store(write, Ordering::Release);
        Some(frame)
    }

    /// Whether a completed frame is waiting.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.write.load(Ordering::Acquire) != self.read.load(Ordering::Acquire)
    }

    /// Drop buffered data and return both toggles to slot 0.
    pub fn reset(&self) {
        for slot in &self.slots {
            slot.lock().clear();
        }
        self.write.store(0, Ordering::Release);
        self.read.store(0, Ordering::Release);
    }
}
