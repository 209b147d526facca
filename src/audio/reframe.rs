//! Re-framing between driver buffers and fixed-size port frames
//!
//! Drivers are asked for a fixed buffer size but are free to call back with
//! other lengths. These two adapters keep the port-side frame length fixed
//! regardless of what the driver hands over. Both allocate only at
//! construction, so they are safe to use inside real-time callbacks.

use crate::audio::{Sample, SILENCE};

/// Collects driver input into complete frames
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    frame: Vec<Sample>,
    filled: usize,
}

impl FrameAssembler {
    pub fn new(frame_len: usize) -> Self {
        Self {
            frame: vec![SILENCE; frame_len],
            filled: 0,
        }
    }

    /// Append samples, calling `emit` once for every frame completed
    pub fn push(
        &mut self,
        samples: impl IntoIterator<Item = Sample>,
        mut emit: impl FnMut(&[Sample]),
    ) {
        for sample in samples {
            self.frame[self.filled] = sample;
            self.filled += 1;
            if self.filled == self.frame.len() {
                emit(&self.frame[..]);
                self.filled = 0;
            }
        }
    }

    /// Samples held back waiting for the rest of their frame
    pub fn pending(&self) -> usize {
        self.filled
    }
}

/// Serves driver output requests out of whole frames
#[derive(Debug, Clone)]
pub struct FrameSlicer {
    frame: Vec<Sample>,
    position: usize,
}

impl FrameSlicer {
    pub fn new(frame_len: usize) -> Self {
        Self {
            frame: vec![SILENCE; frame_len],
            position: frame_len,
        }
    }

    /// Next sample for the driver; `refill` is handed a zeroed frame to fill
    /// whenever the current one is used up
    #[inline]
    pub fn next_sample(&mut self, refill: &mut impl FnMut(&mut [Sample])) -> Sample {
        if self.position == self.frame.len() {
            self.frame.fill(SILENCE);
            refill(&mut self.frame[..]);
            self.position = 0;
        }
        let sample = self.frame[self.position];
        self.position += 1;
        sample
    }

    /// Samples of the current frame not yet handed to the driver
    pub fn remaining(&self) -> usize {
        self.frame.len() - self.position
    }
}
