//! Audio port abstraction and its backends
//!
//! Every backend implements [`AudioPort`]. A port is driven through
//! `initialize -> open -> close -> dispose`; frames flow through the two
//! registered handlers:
//!
//! - the input handler receives every captured frame,
//! - the output handler fills every frame due for playback.
//!
//! Frames handed to either handler always have exactly the configured buffer
//! size of their direction.

pub mod buffer;
#[cfg(feature = "hardware")]
pub mod device;
pub mod file;
#[cfg(feature = "hardware")]
pub mod hardware;
pub mod link;
pub mod pacer;
pub mod reframe;

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::config::AppConfig;
use crate::error::{AudioError, ConfigError};

pub use buffer::SampleBuffer;
pub use file::FilePlaybackPort;
#[cfg(feature = "hardware")]
pub use hardware::{AudioSubsystem, HardwareAudioPort};
pub use link::{LinkImpairment, LinkSimulatorPort};

/// A single mono amplitude, nominally in `[-1.0, 1.0]`
pub type Sample = f64;

/// Zero amplitude
pub const SILENCE: Sample = 0.0;

/// Receives each captured frame
pub type InputHandler = Box<dyn FnMut(&[Sample]) + Send>;

/// Fills each frame due for playback
pub type OutputHandler = Box<dyn FnMut(&mut [Sample]) + Send>;

/// Capability contract shared by all backends.
///
/// Contract violations that are not reported as errors:
/// - `dispose` must not run while a hardware callback is in flight; close the
///   port and allow a grace period first.
/// - Handlers registered after `open` may miss frames.
pub trait AudioPort: Send {
    /// Bind configuration and allocate buffers and filter state
    fn initialize(&mut self, config: &AppConfig) -> Result<(), AudioError>;

    /// Start background capture and playback
    fn open(&mut self) -> Result<(), AudioError>;

    /// Request a cooperative stop
    fn close(&mut self);

    /// Release external resources; safe on a port that was never opened
    fn dispose(&mut self);

    /// Register the capture handler, replacing any previous one
    fn input_callback(&mut self, handler: InputHandler);

    /// Register the playback handler, replacing any previous one
    fn output_callback(&mut self, handler: OutputHandler);
}

/// Zero the part of `frame` past `filled`
#[inline]
pub fn pad_silence(frame: &mut [Sample], filled: usize) {
    if filled < frame.len() {
        frame[filled..].fill(SILENCE);
    }
}

/// Closed set of audio backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Backend {
    /// Sound card duplex stream
    Hardware,
    /// Looping raw f32 file, capture only
    FilePlayback,
    /// Software loopback with noise and band-pass
    #[default]
    LinkSimulator,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Hardware => "hardware",
            Backend::FilePlayback => "file",
            Backend::LinkSimulator => "link",
        }
    }

    /// Build an uninitialized port for this backend
    pub fn create_port(&self) -> Box<dyn AudioPort> {
        match self {
            #[cfg(feature = "hardware")]
            Backend::Hardware => Box::new(HardwareAudioPort::new()),
            #[cfg(not(feature = "hardware"))]
            Backend::Hardware => Box::new(UnavailablePort(self.name())),
            Backend::FilePlayback => Box::new(FilePlaybackPort::new()),
            Backend::LinkSimulator => Box::new(LinkSimulatorPort::new()),
        }
    }
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hardware" | "portaudio" | "cpal" => Ok(Backend::Hardware),
            "file" | "fileplayback" => Ok(Backend::FilePlayback),
            "link" | "echo" | "simulator" | "linksimulator" => Ok(Backend::LinkSimulator),
            _ => Err(ConfigError::UnknownBackend(s.to_string())),
        }
    }
}

impl TryFrom<String> for Backend {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Backend> for String {
    fn from(backend: Backend) -> Self {
        backend.name().to_string()
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Stand-in for backends compiled out of this build
#[cfg(not(feature = "hardware"))]
struct UnavailablePort(&'static str);

#[cfg(not(feature = "hardware"))]
impl AudioPort for UnavailablePort {
    fn initialize(&mut self, _config: &AppConfig) -> Result<(), AudioError> {
        Err(AudioError::BackendUnavailable(self.0))
    }

    fn open(&mut self) -> Result<(), AudioError> {
        Err(AudioError::BackendUnavailable(self.0))
    }

    fn close(&mut self) {}

    fn dispose(&mut self) {}

    fn input_callback(&mut self, _handler: InputHandler) {}

    fn output_callback(&mut self, _handler: OutputHandler) {}
}
