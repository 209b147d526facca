//! Sound card enumeration and mono stream parameters

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleFormat, StreamConfig, SupportedBufferSize, SupportedStreamConfigRange};
use serde::Serialize;

use crate::config::DeviceConfig;
use crate::constants::MONO_CHANNELS;
use crate::error::{AudioError, Direction};

/// Sample formats the hardware port can convert, most preferred first
const PREFERRED_FORMATS: [SampleFormat; 5] = [
    SampleFormat::F32,
    SampleFormat::F64,
    SampleFormat::I32,
    SampleFormat::I16,
    SampleFormat::U16,
];

/// Summary of a device for listings
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub mono: bool,
}

/// Device resolved for one direction, with the stream parameters to open it
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
    pub direction: Direction,
    pub config: StreamConfig,
    pub sample_format: SampleFormat,
    frame_len: usize,
}

impl AudioDevice {
    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    /// Samples per port frame
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }
}

/// List every input and output device of `host`
pub fn list_devices(host: &cpal::Host) -> Vec<DeviceInfo> {
    let mut devices: Vec<DeviceInfo> = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                let (sample_rates, mono) = match device.supported_input_configs() {
                    Ok(configs) => capabilities(configs),
                    Err(_) => (Vec::new(), false),
                };
                devices.push(DeviceInfo {
                    is_default: default_input_name.as_ref() == Some(&name),
                    name,
                    is_input: true,
                    is_output: false,
                    sample_rates,
                    mono,
                });
            }
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let is_default = default_output_name.as_ref() == Some(&name);

                // Duplex devices show up once, flagged for both directions
                if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                    existing.is_output = true;
                    existing.is_default |= is_default;
                    continue;
                }

                let (sample_rates, mono) = match device.supported_output_configs() {
                    Ok(configs) => capabilities(configs),
                    Err(_) => (Vec::new(), false),
                };
                devices.push(DeviceInfo {
                    name,
                    is_input: false,
                    is_output: true,
                    is_default,
                    sample_rates,
                    mono,
                });
            }
        }
    }

    devices
}

/// Common sample rates covered by `configs`, and whether any range is mono
fn capabilities(configs: impl Iterator<Item = SupportedStreamConfigRange>) -> (Vec<u32>, bool) {
    let mut rates = Vec::new();
    let mut mono = false;

    for config in configs {
        mono |= config.channels() == MONO_CHANNELS;
        for rate in [8000u32, 16000, 22050, 44100, 48000, 88200, 96000, 192000] {
            let sample_rate = cpal::SampleRate(rate);
            if sample_rate >= config.min_sample_rate()
                && sample_rate <= config.max_sample_rate()
                && !rates.contains(&rate)
            {
                rates.push(rate);
            }
        }
    }

    rates.sort_unstable();
    (rates, mono)
}

/// Find a device by exact name and build mono stream parameters for it
pub fn resolve_device(
    host: &cpal::Host,
    direction: Direction,
    config: &DeviceConfig,
) -> Result<AudioDevice, AudioError> {
    let devices: Vec<cpal::Device> = match direction {
        Direction::Input => host.input_devices().map(|d| d.collect::<Vec<_>>()),
        Direction::Output => host.output_devices().map(|d| d.collect::<Vec<_>>()),
    }
    .map_err(|e| AudioError::DeviceList(e.to_string()))?;

    let device = devices
        .into_iter()
        .find(|device| device.name().map_or(false, |name| name == config.device))
        .ok_or_else(|| AudioError::DeviceNotFound(config.device.clone()))?;

    let (stream_config, sample_format) = mono_stream_config(&device, direction, config)
        .map_err(|reason| AudioError::StreamParameters { direction, reason })?;

    tracing::debug!(
        "Resolved {} device {}: {:?} {} Hz, {} frames",
        direction,
        config.device,
        sample_format,
        config.sample_rate,
        config.buffer_size
    );

    Ok(AudioDevice {
        inner: device,
        name: config.device.clone(),
        direction,
        config: stream_config,
        sample_format,
        frame_len: config.buffer_size,
    })
}

/// Pick a supported mono format at the configured rate and frame count
fn mono_stream_config(
    device: &cpal::Device,
    direction: Direction,
    config: &DeviceConfig,
) -> Result<(StreamConfig, SampleFormat), String> {
    let frames = u32::try_from(config.buffer_size)
        .map_err(|_| format!("buffer size {} is too large", config.buffer_size))?;
    let sample_rate = cpal::SampleRate(config.sample_rate);

    let ranges: Vec<SupportedStreamConfigRange> = match direction {
        Direction::Input => device.supported_input_configs().map(|c| c.collect::<Vec<_>>()),
        Direction::Output => device.supported_output_configs().map(|c| c.collect::<Vec<_>>()),
    }
    .map_err(|e| e.to_string())?;

    let usable = |range: &&SupportedStreamConfigRange| {
        range.channels() == MONO_CHANNELS
            && range.min_sample_rate() <= sample_rate
            && sample_rate <= range.max_sample_rate()
            && match range.buffer_size() {
                SupportedBufferSize::Range { min, max } => *min <= frames && frames <= *max,
                SupportedBufferSize::Unknown => true,
            }
    };

    let sample_format = PREFERRED_FORMATS
        .iter()
        .copied()
        .find(|format| {
            ranges
                .iter()
                .filter(|range| usable(range))
                .any(|range| range.sample_format() == *format)
        })
        .ok_or_else(|| {
            format!(
                "no mono configuration at {} Hz with {} frames",
                config.sample_rate, config.buffer_size
            )
        })?;

    let stream_config = StreamConfig {
        channels: MONO_CHANNELS,
        sample_rate,
        buffer_size: cpal::BufferSize::Fixed(frames),
    };
    Ok((stream_config, sample_format))
}
