//! Locked sample queue
//!
//! Appends at the tail, removes from the head. Used as the loopback queue of
//! the link simulator and as the sample store of the network elastic buffer.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::audio::{pad_silence, Sample};

/// Growable FIFO of samples behind a single lock
#[derive(Debug, Default)]
pub struct SampleBuffer {
    samples: Mutex<VecDeque<Sample>>,
    underrun_count: AtomicUsize,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer with room for `capacity` samples before reallocating
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Append samples at the tail
    pub fn push(&self, samples: &[Sample]) {
        self.samples.lock().extend(samples.iter().copied());
    }

    /// Append already-owned samples at the tail
    pub fn extend(&self, samples: impl IntoIterator<Item = Sample>) {
        self.samples.lock().extend(samples);
    }

    /// Fill `frame` from the head.
    ///
    /// Returns the number of samples taken. When fewer than `frame.len()`
    /// samples are queued the rest of the frame is zeroed and the underrun
    /// is counted.
    pub fn pop_frame(&self, frame: &mut [Sample]) -> usize {
        let taken = self.pop_into(frame);
        if taken < frame.len() {
            pad_silence(frame, taken);
            self.underrun_count.fetch_add(1, Ordering::Relaxed);
        }
        taken
    }

    /// Copy up to `out.len()` samples from the head into `out`, leaving the
    /// remainder untouched
    pub fn pop_into(&self, out: &mut [Sample]) -> usize {
        let mut samples = self.samples.lock();
        let taken = out.len().min(samples.len());
        for (slot, sample) in out.iter_mut().zip(samples.drain(..taken)) {
            *slot = sample;
        }
        taken
    }

    /// Remove up to `n` samples from the head
    pub fn pop_up_to(&self, n: usize) -> Vec<Sample> {
        let mut samples = self.samples.lock();
        let taken = n.min(samples.len());
        samples.drain(..taken).collect()
    }

    /// Number of queued samples
    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Drop every queued sample
    pub fn clear(&self) {
        self.samples.lock().clear();
    }

    /// Frames that had to be zero padded
    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }

    pub fn reset_stats(&self) {
        self.underrun_count.store(0, Ordering::Relaxed);
    }
}
