//! Sample codecs
//!
//! The network carries little-endian f64 samples while source files hold
//! little-endian f32 samples. Both are headerless.

pub mod pcm;

pub use pcm::{decode_f32_le, decode_f64_le, encode_f32_le, encode_f64_le, encode_f64_le_into};
