//! File playback backend
//!
//! Capture-only port that replays a raw little-endian f32 file forever,
//! one input frame per period. There is no playback path; an output handler
//! may be registered but is never called.

use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::pacer::Pacer;
use crate::audio::{AudioPort, InputHandler, OutputHandler, Sample, SILENCE};
use crate::codec::decode_f32_le;
use crate::config::{AppConfig, DeviceConfig};
use crate::error::{AudioError, Direction};

/// Endless reader over a decoded sample sequence
#[derive(Debug, Clone)]
pub struct LoopCursor {
    samples: Arc<[Sample]>,
    position: usize,
}

impl LoopCursor {
    /// `samples` must not be empty
    fn new(samples: Arc<[Sample]>) -> Self {
        debug_assert!(!samples.is_empty());
        Self {
            samples,
            position: 0,
        }
    }

    /// Fill `frame` with the next samples, wrapping to the start at the end
    pub fn fill(&mut self, frame: &mut [Sample]) {
        let mut filled = 0;
        while filled < frame.len() {
            let available = &self.samples[self.position..];
            let count = available.len().min(frame.len() - filled);
            frame[filled..filled + count].copy_from_slice(&available[..count]);
            filled += count;
            self.position += count;
            if self.position == self.samples.len() {
                self.position = 0;
            }
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

/// Capture port backed by a looping sample file
pub struct FilePlaybackPort {
    /// Run flag of the current open, replaced on every open
    running: Arc<AtomicBool>,
    /// Receives every looped frame
    input_handler: Arc<Mutex<Option<InputHandler>>>,
    /// Read position in the loaded source, set by initialize
    cursor: Option<Arc<Mutex<LoopCursor>>>,
    /// Capture frame length and rate
    input: DeviceConfig,
    /// Capture loop
    thread: Option<JoinHandle<()>>,
}

impl FilePlaybackPort {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            input_handler: Arc::new(Mutex::new(None)),
            cursor: None,
            input: DeviceConfig::default(),
            thread: None,
        }
    }

    /// Check if the capture loop is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of samples in the loaded source
    pub fn source_len(&self) -> usize {
        self.cursor.as_ref().map_or(0, |cursor| cursor.lock().samples.len())
    }

    fn join_thread(&mut self) {
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::error!("File playback thread panicked");
            }
        }
    }
}

impl Default for FilePlaybackPort {
    fn default() -> Self {
        Self::new()
    }
}

/// Read and decode a whole source file
pub fn load_samples(path: &Path) -> Result<Vec<Sample>, AudioError> {
    let content = std::fs::read(path).map_err(|source| AudioError::FileAccess {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(decode_f32_le(&content))
}

impl AudioPort for FilePlaybackPort {
    fn initialize(&mut self, config: &AppConfig) -> Result<(), AudioError> {
        if self.is_running() {
            return Err(AudioError::AlreadyInitialized);
        }
        config
            .input
            .validate(Direction::Input)
            .map_err(|e| AudioError::InvalidDevice(e.to_string()))?;

        let samples = load_samples(&config.file.input)?;
        if samples.is_empty() {
            return Err(AudioError::EmptySource(config.file.input.clone()));
        }
        tracing::info!(
            "Loaded {} samples ({:.2} s) from {}",
            samples.len(),
            samples.len() as f64 / config.input.sample_rate as f64,
            config.file.input.display()
        );

        self.input = config.input.clone();
        self.cursor = Some(Arc::new(Mutex::new(LoopCursor::new(samples.into()))));
        Ok(())
    }

    fn open(&mut self) -> Result<(), AudioError> {
        let cursor = self.cursor.clone().ok_or(AudioError::NotInitialized)?;
        if self.is_running() {
            return Ok(());
        }
        self.join_thread();

        if self.input_handler.lock().is_none() {
            tracing::warn!("File playback opened without an input handler, frames are discarded");
        }

        let running = Arc::new(AtomicBool::new(true));
        self.running = running.clone();

        let handler = self.input_handler.clone();
        let frame_len = self.input.buffer_size;
        let pacer = Pacer::new(self.input.frame_period());
        let handle = thread::Builder::new()
            .name("file-capture".into())
            .spawn(move || capture_loop(cursor, handler, running, frame_len, pacer))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                AudioError::Thread("file-capture", e.to_string())
            })?;
        self.thread = Some(handle);

        tracing::info!(
            "File playback open: {} samples @ {} Hz",
            self.input.buffer_size,
            self.input.sample_rate
        );
        Ok(())
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn dispose(&mut self) {
        self.close();
        self.join_thread();
    }

    fn input_callback(&mut self, handler: InputHandler) {
        *self.input_handler.lock() = Some(handler);
    }

    fn output_callback(&mut self, _handler: OutputHandler) {
        tracing::debug!("File playback has no output path, output handler ignored");
    }
}

impl Drop for FilePlaybackPort {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn capture_loop(
    cursor: Arc<Mutex<LoopCursor>>,
    handler: Arc<Mutex<Option<InputHandler>>>,
    running: Arc<AtomicBool>,
    frame_len: usize,
    mut pacer: Pacer,
) {
    let mut frame = vec![SILENCE; frame_len];
    while running.load(Ordering::Relaxed) {
        cursor.lock().fill(&mut frame);
        if let Some(handler) = handler.lock().as_mut() {
            handler(&frame[..]);
        }
        pacer.wait();
    }
}
