//! Raw PCM encoding for network and file samples

use bytes::{BufMut, Bytes, BytesMut};

use crate::audio::Sample;

/// Bytes per sample on the network
pub const NETWORK_SAMPLE_SIZE: usize = std::mem::size_of::<f64>();

/// Bytes per sample in source files
pub const FILE_SAMPLE_SIZE: usize = std::mem::size_of::<f32>();

/// Encode samples as little-endian f64 for the network
pub fn encode_f64_le(samples: &[Sample]) -> Bytes {
    encode_f64_le_into(samples, &mut BytesMut::new())
}

/// Same as [`encode_f64_le`], writing through `scratch`.
///
/// Once the returned chunks have been dropped, `scratch` gets its storage
/// back on the next call, so a steady stream of equal-sized frames stops
/// allocating.
pub fn encode_f64_le_into(samples: &[Sample], scratch: &mut BytesMut) -> Bytes {
    scratch.reserve(samples.len() * NETWORK_SAMPLE_SIZE);
    for &sample in samples {
        scratch.put_f64_le(sample);
    }
    scratch.split().freeze()
}

/// Decode little-endian f64 samples, ignoring a trailing partial sample
pub fn decode_f64_le(bytes: &[u8]) -> Vec<Sample> {
    bytes
        .chunks_exact(NETWORK_SAMPLE_SIZE)
        .map(|chunk| {
            let mut raw = [0u8; NETWORK_SAMPLE_SIZE];
            raw.copy_from_slice(chunk);
            f64::from_le_bytes(raw)
        })
        .collect()
}

/// Encode samples as little-endian f32, the source file layout
pub fn encode_f32_le(samples: &[Sample]) -> Bytes {
    let mut out = BytesMut::with_capacity(samples.len() * FILE_SAMPLE_SIZE);
    for &sample in samples {
        out.put_f32_le(sample as f32);
    }
    out.freeze()
}

/// Decode little-endian f32 samples, ignoring a trailing partial sample
pub fn decode_f32_le(bytes: &[u8]) -> Vec<Sample> {
    bytes
        .chunks_exact(FILE_SAMPLE_SIZE)
        .map(|chunk| {
            let mut raw = [0u8; FILE_SAMPLE_SIZE];
            raw.copy_from_slice(chunk);
            Sample::from(f32::from_le_bytes(raw))
        })
        .collect()
}
