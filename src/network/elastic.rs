//! Elastic buffer between network chunks and playback frames
//!
//! Peers deliver bytes in whatever chunk sizes TCP hands over; playback
//! wants fixed-size frames on its own clock. Bytes are decoded as they
//! arrive, with a partial trailing sample carried over to the next chunk, and
//! playback drains whole samples from the head.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::audio::buffer::SampleBuffer;
use crate::audio::{pad_silence, Sample};
use crate::codec::pcm::{decode_f64_le, NETWORK_SAMPLE_SIZE};

/// Byte-in, sample-out FIFO
#[derive(Debug, Default)]
pub struct ElasticBuffer {
    samples: SampleBuffer,
    /// Bytes of a sample whose remaining bytes have not arrived yet
    pending: Mutex<Vec<u8>>,
    /// Playback frames that had to be padded
    underruns: AtomicUsize,
}

impl ElasticBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of little-endian f64 bytes
    pub fn put(&self, bytes: &[u8]) {
        // Held across decode and append so concurrent puts stay in order
        let mut pending = self.pending.lock();
        pending.extend_from_slice(bytes);

        let whole = pending.len() - pending.len() % NETWORK_SAMPLE_SIZE;
        if whole == 0 {
            return;
        }
        self.samples.extend(decode_f64_le(&pending[..whole]));
        pending.drain(..whole);
    }

    /// Remove up to `n` samples from the head
    pub fn get(&self, n: usize) -> Vec<Sample> {
        self.samples.pop_up_to(n)
    }

    /// Copy up to `frame.len()` samples into `frame`, returning how many were
    /// available. The rest of `frame` is left untouched.
    pub fn get_into(&self, frame: &mut [Sample]) -> usize {
        self.samples.pop_into(frame)
    }

    /// Fill a whole playback frame, zero padding on underrun
    pub fn fill_frame(&self, frame: &mut [Sample]) -> usize {
        let taken = self.get_into(frame);
        if taken < frame.len() {
            pad_silence(frame, taken);
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
        taken
    }

    /// Decoded samples waiting for playback
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Frames that had to be padded with silence
    pub fn underrun_count(&self) -> usize {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Drop queued samples and any partial sample
    pub fn clear(&self) {
        let mut pending = self.pending.lock();
        pending.clear();
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_f64_le;
    use proptest::prelude::*;

    fn ramp(len: usize) -> Vec<Sample> {
        (0..len).map(|i| i as Sample / len as Sample - 0.5).collect()
    }

    #[test]
    fn test_odd_chunk_sizes() {
        let samples = ramp(600);
        let bytes = encode_f64_le(&samples);
        let buffer = ElasticBuffer::new();

        buffer.put(&bytes[..3]);
        assert!(buffer.is_empty());

        buffer.put(&bytes[3..16]);
        assert_eq!(buffer.len(), 2);

        buffer.put(&bytes[16..16 + 4096]);
        assert_eq!(buffer.len(), (16 + 4096) / 8);

        buffer.put(&bytes[16 + 4096..]);
        assert_eq!(buffer.get(samples.len()), samples);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_get_returns_only_available() {
        let buffer = ElasticBuffer::new();
        buffer.put(&encode_f64_le(&[0.1, 0.2, 0.3]));

        assert_eq!(buffer.get(2), vec![0.1, 0.2]);
        assert_eq!(buffer.get(10), vec![0.3]);
        assert!(buffer.get(4).is_empty());
    }

    #[test]
    fn test_get_into_leaves_tail_untouched() {
        let buffer = ElasticBuffer::new();
        buffer.put(&encode_f64_le(&[0.1]));

        let mut frame = [5.0; 3];
        assert_eq!(buffer.get_into(&mut frame), 1);
        assert_eq!(frame, [0.1, 5.0, 5.0]);
        assert_eq!(buffer.underrun_count(), 0);
    }

    #[test]
    fn test_fill_frame_pads_with_silence() {
        let buffer = ElasticBuffer::new();
        buffer.put(&encode_f64_le(&[0.7, -0.7]));

        let mut frame = [1.0; 5];
        assert_eq!(buffer.fill_frame(&mut frame), 2);
        assert_eq!(frame, [0.7, -0.7, 0.0, 0.0, 0.0]);
        assert_eq!(buffer.underrun_count(), 1);
    }

    #[test]
    fn test_clear_drops_partial_sample() {
        let buffer = ElasticBuffer::new();
        let bytes = encode_f64_le(&[0.25, 0.5]);
        buffer.put(&bytes[..12]);
        buffer.clear();

        buffer.put(&encode_f64_le(&[0.75]));
        assert_eq!(buffer.get(4), vec![0.75]);
    }

    proptest! {
        #[test]
        fn prop_any_chunking_is_contiguous(
            samples in prop::collection::vec(-1.0f64..1.0, 1..200),
            cuts in prop::collection::vec(0usize..2000, 0..20),
        ) {
            let bytes = encode_f64_le(&samples);
            let mut cuts: Vec<usize> = cuts.into_iter().map(|c| c % (bytes.len() + 1)).collect();
            cuts.push(0);
            cuts.push(bytes.len());
            cuts.sort_unstable();

            let buffer = ElasticBuffer::new();
            for window in cuts.windows(2) {
                buffer.put(&bytes[window[0]..window[1]]);
            }

            prop_assert_eq!(buffer.get(samples.len()), samples);
            prop_assert!(buffer.is_empty());
        }
    }
}
