//! Configuration model and loader
//!
//! The configuration file is JSON by default; a `.toml` extension switches
//! the parser. Field names follow the camelCase layout of the on-disk format:
//!
//! ```json
//! {
//!   "port": 5000,
//!   "backend": "echo",
//!   "input":  { "device": "USB Audio", "sampleRate": 48000, "bufferSize": 480 },
//!   "output": { "device": "USB Audio", "sampleRate": 48000, "bufferSize": 480 },
//!   "echo":   { "noiseLevel": 0.01, "lowCut": 300, "highCut": 3000, "bpfOrder": 2 },
//!   "file":   { "input": "capture.f32" }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::audio::Backend;
use crate::constants::*;
use crate::error::{ConfigError, Direction};

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// TCP port peers connect to
    #[serde(default = "default_port")]
    pub port: u16,

    /// Audio backend to run
    #[serde(default)]
    pub backend: Backend,

    /// Capture direction
    #[serde(default)]
    pub input: DeviceConfig,

    /// Playback direction
    #[serde(default)]
    pub output: DeviceConfig,

    /// Link simulator impairment parameters
    #[serde(default, alias = "echo")]
    pub link: LinkConfig,

    /// File playback source
    #[serde(default)]
    pub file: FileSourceConfig,
}

fn default_port() -> u16 {
    DEFAULT_TCP_PORT
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_TCP_PORT,
            backend: Backend::default(),
            input: DeviceConfig::default(),
            output: DeviceConfig::default(),
            link: LinkConfig::default(),
            file: FileSourceConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON or TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::from_toml_str(&content)?,
            _ => Self::from_json_str(&content)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from JSON text
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Default config location: `<user config dir>/sound-bridge/config.json`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        directories::ProjectDirs::from("", "", APP_NAME)
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Check the device descriptors of both directions.
    ///
    /// Link parameters are checked by the link simulator at initialize,
    /// since only that backend uses them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.input.validate(Direction::Input)?;
        self.output.validate(Direction::Output)?;
        Ok(())
    }
}

/// Device descriptor for one direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    /// Exact device name as reported by the host
    #[serde(default)]
    pub device: String,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Frame length in samples
    pub buffer_size: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl DeviceConfig {
    pub fn validate(&self, direction: Direction) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::InvalidDevice {
                direction,
                reason: "sample rate must be greater than zero".into(),
            });
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidDevice {
                direction,
                reason: "buffer size must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Time covered by one frame, used as the loop period of software ports
    pub fn frame_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.buffer_size as f64 / self.sample_rate as f64)
    }
}

/// Link simulator impairment parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkConfig {
    /// Noise amplitude relative to a full-band channel
    #[serde(default)]
    pub noise_level: f64,

    /// Lower band edge in Hz
    pub low_cut: f64,

    /// Upper band edge in Hz
    pub high_cut: f64,

    /// Butterworth order of the band-pass
    #[serde(alias = "filterOrder")]
    pub bpf_order: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            noise_level: 0.0,
            low_cut: DEFAULT_LOW_CUT,
            high_cut: DEFAULT_HIGH_CUT,
            bpf_order: DEFAULT_BPF_ORDER,
        }
    }
}

/// File playback source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileSourceConfig {
    /// Raw little-endian f32 file
    #[serde(default)]
    pub input: PathBuf,
}
