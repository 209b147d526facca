//! Sound card backend (cpal)
//!
//! Capture and playback are driven by the driver's own callbacks. The port
//! owns two device handles resolved at initialize and rebuilds both streams
//! on every open. cpal streams are not `Send`, so they live on a dedicated
//! stream thread for as long as the port is open, the same way the capture
//! threads keep their stream alive.
//!
//! The callback code in this module does not allocate or block: handler
//! locks are taken with `try_lock`, and if a handler is being replaced at
//! that moment the frame is dropped (input) or played as silence (output).
//! Handlers themselves run inside the driver callback, so how long they take
//! is up to the caller.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample as _, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::{list_devices, resolve_device, AudioDevice, DeviceInfo};
use crate::audio::reframe::{FrameAssembler, FrameSlicer};
use crate::audio::{AudioPort, InputHandler, OutputHandler, Sample};
use crate::config::AppConfig;
use crate::constants::STREAM_ERROR_CAPACITY;
use crate::error::{AudioError, Direction};

/// Set while an [`AudioSubsystem`] handle is alive
static SUBSYSTEM_HELD: AtomicBool = AtomicBool::new(false);

/// Owning handle on the process-wide audio host.
///
/// At most one handle exists at a time; dropping it releases the host so a
/// later port can acquire it again. This is what limits a process to one live
/// [`HardwareAudioPort`].
pub struct AudioSubsystem {
    host: cpal::Host,
}

impl AudioSubsystem {
    pub fn acquire() -> Result<Self, AudioError> {
        SUBSYSTEM_HELD
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| AudioError::SubsystemBusy)?;

        tracing::debug!("Audio subsystem acquired");
        Ok(Self {
            host: cpal::default_host(),
        })
    }

    pub fn host(&self) -> &cpal::Host {
        &self.host
    }

    /// List devices of the held host
    pub fn devices(&self) -> Vec<DeviceInfo> {
        list_devices(&self.host)
    }
}

impl Drop for AudioSubsystem {
    fn drop(&mut self) {
        SUBSYSTEM_HELD.store(false, Ordering::SeqCst);
        tracing::debug!("Audio subsystem released");
    }
}

/// Duplex sound card port
pub struct HardwareAudioPort {
    /// Host handle, held from initialize until dispose
    subsystem: Option<AudioSubsystem>,
    /// Capture device and its stream parameters
    input: Option<AudioDevice>,
    /// Playback device and its stream parameters
    output: Option<AudioDevice>,
    /// Receives each re-framed capture frame
    input_handler: Arc<Mutex<Option<InputHandler>>>,
    /// Fills each playback frame
    output_handler: Arc<Mutex<Option<OutputHandler>>>,
    /// Keeps the stream thread alive
    running: Arc<AtomicBool>,
    /// Thread owning both streams
    thread: Option<JoinHandle<()>>,
    /// Driver errors of the current open
    error_rx: Option<Receiver<AudioError>>,
}

impl HardwareAudioPort {
    pub fn new() -> Self {
        Self {
            subsystem: None,
            input: None,
            output: None,
            input_handler: Arc::new(Mutex::new(None)),
            output_handler: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            error_rx: None,
        }
    }

    /// Check if the streams are running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Drain errors reported by the driver since the last call
    pub fn stream_errors(&self) -> Vec<AudioError> {
        self.error_rx
            .as_ref()
            .map(|rx| rx.try_iter().collect())
            .unwrap_or_default()
    }
}

impl Default for HardwareAudioPort {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioPort for HardwareAudioPort {
    fn initialize(&mut self, config: &AppConfig) -> Result<(), AudioError> {
        if self.subsystem.is_some() {
            return Err(AudioError::AlreadyInitialized);
        }
        config
            .validate()
            .map_err(|e| AudioError::InvalidDevice(e.to_string()))?;

        let subsystem = AudioSubsystem::acquire()?;
        let input = resolve_device(subsystem.host(), Direction::Input, &config.input)?;
        let output = resolve_device(subsystem.host(), Direction::Output, &config.output)?;

        tracing::info!("Input device: {} ({:?})", input.name, input.sample_format);
        tracing::info!("Output device: {} ({:?})", output.name, output.sample_format);

        self.input = Some(input);
        self.output = Some(output);
        self.subsystem = Some(subsystem);
        Ok(())
    }

    fn open(&mut self) -> Result<(), AudioError> {
        let (input, output) = match (&self.input, &self.output) {
            (Some(input), Some(output)) => (StreamSpec::from(input), StreamSpec::from(output)),
            _ => return Err(AudioError::NotInitialized),
        };
        if self.is_running() {
            return Ok(());
        }

        if self.output_handler.lock().is_none() {
            tracing::warn!("Hardware port opened without an output handler, playing silence");
        }
        if self.input_handler.lock().is_none() {
            tracing::warn!("Hardware port opened without an input handler, captured frames are discarded");
        }

        let (error_tx, error_rx) = bounded::<AudioError>(STREAM_ERROR_CAPACITY);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let running = Arc::new(AtomicBool::new(true));
        self.running = running.clone();

        let input_handler = self.input_handler.clone();
        let output_handler = self.output_handler.clone();

        let handle = thread::Builder::new()
            .name("hardware-stream".into())
            .spawn(move || {
                let streams = build_input(&input, input_handler, error_tx.clone()).and_then(
                    |input_stream| {
                        let output_stream = build_output(&output, output_handler, error_tx)?;
                        Ok((input_stream, output_stream))
                    },
                );

                let (input_stream, output_stream) = match streams {
                    Ok(streams) => streams,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                for (stream, direction) in [
                    (&input_stream, Direction::Input),
                    (&output_stream, Direction::Output),
                ] {
                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(AudioError::StreamOpen {
                            direction,
                            reason: e.to_string(),
                        }));
                        return;
                    }
                }
                let _ = ready_tx.send(Ok(()));

                // Keep the streams alive while running
                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Streams are dropped here, stopping playback and capture
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                AudioError::Thread("hardware-stream", e.to_string())
            })?;

        let started = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(AudioError::StreamError("stream thread exited".into())));
        if let Err(e) = started {
            self.running.store(false, Ordering::SeqCst);
            let _ = handle.join();
            return Err(e);
        }

        self.thread = Some(handle);
        self.error_rx = Some(error_rx);
        tracing::info!("Hardware streams started");
        Ok(())
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::error!("Hardware stream thread panicked");
            }
            tracing::info!("Hardware streams stopped");
        }
    }

    fn dispose(&mut self) {
        self.close();
        self.input = None;
        self.output = None;
        self.subsystem = None;
    }

    fn input_callback(&mut self, handler: InputHandler) {
        *self.input_handler.lock() = Some(handler);
    }

    fn output_callback(&mut self, handler: OutputHandler) {
        *self.output_handler.lock() = Some(handler);
    }
}

impl Drop for HardwareAudioPort {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// What the stream thread needs to rebuild one stream
struct StreamSpec {
    device: cpal::Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    frame_len: usize,
    direction: Direction,
}

impl From<&AudioDevice> for StreamSpec {
    fn from(device: &AudioDevice) -> Self {
        Self {
            device: device.inner().clone(),
            config: device.config.clone(),
            sample_format: device.sample_format,
            frame_len: device.frame_len(),
            direction: device.direction,
        }
    }
}

fn build_input(
    spec: &StreamSpec,
    handler: Arc<Mutex<Option<InputHandler>>>,
    errors: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError> {
    let stream = match spec.sample_format {
        SampleFormat::F32 => input_stream::<f32>(spec, handler, errors),
        SampleFormat::F64 => input_stream::<f64>(spec, handler, errors),
        SampleFormat::I32 => input_stream::<i32>(spec, handler, errors),
        SampleFormat::I16 => input_stream::<i16>(spec, handler, errors),
        SampleFormat::U16 => input_stream::<u16>(spec, handler, errors),
        other => {
            return Err(AudioError::StreamOpen {
                direction: spec.direction,
                reason: format!("unsupported sample format {other:?}"),
            })
        }
    };
    stream.map_err(|e| AudioError::StreamOpen {
        direction: spec.direction,
        reason: e.to_string(),
    })
}

fn build_output(
    spec: &StreamSpec,
    handler: Arc<Mutex<Option<OutputHandler>>>,
    errors: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError> {
    let stream = match spec.sample_format {
        SampleFormat::F32 => output_stream::<f32>(spec, handler, errors),
        SampleFormat::F64 => output_stream::<f64>(spec, handler, errors),
        SampleFormat::I32 => output_stream::<i32>(spec, handler, errors),
        SampleFormat::I16 => output_stream::<i16>(spec, handler, errors),
        SampleFormat::U16 => output_stream::<u16>(spec, handler, errors),
        other => {
            return Err(AudioError::StreamOpen {
                direction: spec.direction,
                reason: format!("unsupported sample format {other:?}"),
            })
        }
    };
    stream.map_err(|e| AudioError::StreamOpen {
        direction: spec.direction,
        reason: e.to_string(),
    })
}

fn input_stream<T>(
    spec: &StreamSpec,
    handler: Arc<Mutex<Option<InputHandler>>>,
    errors: Sender<AudioError>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    Sample: FromSample<T>,
{
    let mut assembler = FrameAssembler::new(spec.frame_len);
    spec.device.build_input_stream(
        &spec.config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            assembler.push(data.iter().map(|s| s.to_sample::<Sample>()), |frame| {
                if let Some(mut guard) = handler.try_lock() {
                    if let Some(handler) = guard.as_mut() {
                        handler(frame);
                    }
                }
            });
        },
        move |err| {
            let _ = errors.try_send(AudioError::StreamError(err.to_string()));
        },
        None,
    )
}

fn output_stream<T>(
    spec: &StreamSpec,
    handler: Arc<Mutex<Option<OutputHandler>>>,
    errors: Sender<AudioError>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<Sample>,
{
    let mut slicer = FrameSlicer::new(spec.frame_len);
    let mut refill = move |frame: &mut [Sample]| {
        if let Some(mut guard) = handler.try_lock() {
            if let Some(handler) = guard.as_mut() {
                handler(frame);
            }
        }
    };
    spec.device.build_output_stream(
        &spec.config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            for out in data.iter_mut() {
                *out = slicer.next_sample(&mut refill).to_sample::<T>();
            }
        },
        move |err| {
            let _ = errors.try_send(AudioError::StreamError(err.to_string()));
        },
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    // Both checks share the process-wide subsystem, so they run in one test
    #[test]
    fn test_subsystem_and_device_lookup() {
        let first = AudioSubsystem::acquire().unwrap();
        assert!(matches!(
            AudioSubsystem::acquire(),
            Err(AudioError::SubsystemBusy)
        ));
        drop(first);

        let mut port = HardwareAudioPort::new();
        assert!(matches!(port.open(), Err(AudioError::NotInitialized)));

        let mut config = AppConfig::default();
        config.input.device = "no such device \u{1F50A}".into();
        config.output.device = config.input.device.clone();
        let result = port.initialize(&config);
        assert!(matches!(
            result,
            Err(AudioError::DeviceNotFound(_)) | Err(AudioError::DeviceList(_))
        ));

        // A failed initialize releases the subsystem again
        let again = AudioSubsystem::acquire();
        assert!(again.is_ok());
        drop(again);

        port.dispose();
        assert!(port.stream_errors().is_empty());
    }
}
