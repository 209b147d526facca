//! # Sound Bridge
//!
//! Bridges a mono audio port to a TCP byte stream: captured frames are
//! broadcast to every connected peer, and bytes received from peers are
//! played back.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         AudioPort (audio)                            │
//! │   ┌──────────────┐   ┌──────────────┐   ┌────────────────────────┐   │
//! │   │   Hardware   │   │     File     │   │     Link simulator     │   │
//! │   │ (cpal duplex)│   │ (f32 loop)   │   │ playback ─▶ queue ─┐   │   │
//! │   └──────────────┘   └──────────────┘   │ capture ◀─ noise/BPF ─┘│   │
//! │                                         └────────────────────────┘   │
//! │        input callback │                    ▲ output callback         │
//! └───────────────────────┼────────────────────┼─────────────────────────┘
//!                         ▼                    │
//!              ┌────────────────────┐  ┌────────────────────────┐
//!              │ pcm::encode_f64_le │  │ ElasticBuffer          │
//!              └─────────┬──────────┘  │ (fill_frame, padded)   │
//!                        │             └───────────▲────────────┘
//!                        ▼                         │ put(bytes)
//!              ┌─────────────────────────────────────────────────┐
//!              │      BroadcastServer (network::tcp, tokio)      │
//!              │   broadcast ─▶ every peer   peer bytes ─▶ put   │
//!              └─────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod bridge;
pub mod codec;
pub mod config;
pub mod dsp;
pub mod error;
pub mod network;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Name used for the config directory and logging
    pub const APP_NAME: &str = "sound-bridge";

    /// File name looked up in the config directory
    pub const CONFIG_FILE_NAME: &str = "config.json";

    /// Default sample rate for both directions
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default frame length in samples (10 ms at 48 kHz)
    pub const DEFAULT_BUFFER_SIZE: usize = 480;

    /// Default TCP port peers connect to
    pub const DEFAULT_TCP_PORT: u16 = 5000;

    /// Default link simulator passband
    pub const DEFAULT_LOW_CUT: f64 = 300.0;
    pub const DEFAULT_HIGH_CUT: f64 = 3000.0;

    /// Default link simulator band-pass order
    pub const DEFAULT_BPF_ORDER: usize = 2;

    /// Audio is strictly mono
    pub const MONO_CHANNELS: u16 = 1;

    /// Outgoing chunks queued per peer before chunks are dropped
    pub const PEER_QUEUE_CAPACITY: usize = 256;

    /// Read buffer size for peer connections
    pub const READ_BUFFER_SIZE: usize = 4096;

    /// Time allowed for background loops to observe a close
    pub const SHUTDOWN_GRACE_MS: u64 = 1000;

    /// Minimum gap between repeated broadcast failure warnings
    pub const BROADCAST_WARN_INTERVAL_MS: u64 = 1000;

    /// Driver stream errors kept until someone drains them
    pub const STREAM_ERROR_CAPACITY: usize = 16;
}
