//! Error types for the sound bridge

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stream direction, used to label device and parameter errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

/// Audio port errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device {0} not found")]
    DeviceNotFound(String),

    #[error("Unable to get device list: {0}")]
    DeviceList(String),

    #[error("Unable to build {direction} stream parameters: {reason}")]
    StreamParameters { direction: Direction, reason: String },

    #[error("Unable to open {direction} stream: {reason}")]
    StreamOpen { direction: Direction, reason: String },

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Unable to open specified file {path}: {source}")]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Source file {0} contains no samples")]
    EmptySource(PathBuf),

    #[error("Invalid link configuration: {0}")]
    InvalidLink(#[from] FilterError),

    #[error("Invalid device configuration: {0}")]
    InvalidDevice(String),

    #[error("Port is not initialized")]
    NotInitialized,

    #[error("Port is already initialized")]
    AlreadyInitialized,

    #[error("Audio subsystem is already held by another port")]
    SubsystemBusy,

    #[error("Backend {0} is not available in this build")]
    BackendUnavailable(&'static str),

    #[error("Failed to spawn {0} thread: {1}")]
    Thread(&'static str, String),
}

/// Band-pass filter design errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("filter order must be greater than zero")]
    ZeroOrder,

    #[error("sample rate must be positive, got {0}")]
    SampleRate(f64),

    #[error("low cut {low} Hz must be below high cut {high} Hz")]
    EmptyPassband { low: f64, high: f64 },

    #[error("cutoffs must lie strictly between 0 Hz and Nyquist ({nyquist} Hz), got {low}-{high} Hz")]
    CutoffRange { low: f64, high: f64, nyquist: f64 },

    #[error("noise level must be finite and non-negative, got {0}")]
    NoiseLevel(f64),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unable to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    #[error("Invalid {direction} device: {reason}")]
    InvalidDevice { direction: Direction, reason: String },

    #[error("No configuration directory available on this system")]
    NoConfigDir,
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Send failed to {failed} of {peers} peers")]
    SendFailed { failed: usize, peers: usize },

    #[error("Server is not running")]
    NotRunning,
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
