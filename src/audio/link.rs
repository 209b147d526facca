//! Link simulator backend
//!
//! A software full-duplex channel: every frame produced for playback is
//! queued, and the capture side reads the queue back through an impairment
//! model (uniform noise plus a Butterworth band-pass), as if the audio had
//! crossed a noisy analog link.
//!
//! Both directions run on their own thread, each paced at the duration of one
//! frame of its direction. The loopback queue is the only state the two
//! threads share.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::buffer::SampleBuffer;
use crate::audio::pacer::Pacer;
use crate::audio::{AudioPort, InputHandler, OutputHandler, Sample, SILENCE};
use crate::config::{AppConfig, DeviceConfig, LinkConfig};
use crate::dsp::BandPass;
use crate::error::{AudioError, Direction, FilterError};

/// Noise and band-pass applied to every captured frame
#[derive(Debug)]
pub struct LinkImpairment {
    equalized_noise: f64,
    filter: BandPass,
    rng: StdRng,
}

impl LinkImpairment {
    /// Build the impairment for a link whose playback side runs at `sample_rate`
    pub fn new(link: &LinkConfig, sample_rate: f64) -> Result<Self, FilterError> {
        Self::with_rng(link, sample_rate, StdRng::from_entropy())
    }

    /// Same as [`LinkImpairment::new`] with a reproducible noise sequence
    pub fn with_seed(link: &LinkConfig, sample_rate: f64, seed: u64) -> Result<Self, FilterError> {
        Self::with_rng(link, sample_rate, StdRng::seed_from_u64(seed))
    }

    fn with_rng(link: &LinkConfig, sample_rate: f64, rng: StdRng) -> Result<Self, FilterError> {
        let filter = BandPass::setup(link.bpf_order, sample_rate, link.low_cut, link.high_cut)?;
        if !(link.noise_level.is_finite() && link.noise_level >= 0.0) {
            return Err(FilterError::NoiseLevel(link.noise_level));
        }

        // Noise is specified against the full band, so a narrow passband
        // gets proportionally more of it to keep the in-band level comparable.
        let max_bandwidth = sample_rate / 2.0;
        let equalized_noise = link.noise_level * max_bandwidth / filter.bandwidth();

        Ok(Self {
            equalized_noise,
            filter,
            rng,
        })
    }

    /// Noise amplitude after passband normalization
    pub fn equalized_noise_level(&self) -> f64 {
        self.equalized_noise
    }

    /// Impair `frame` in place
    pub fn apply(&mut self, frame: &mut [Sample]) {
        let gain = 1.0 / (1.0 + self.equalized_noise);
        for sample in frame.iter_mut() {
            let noise = self.rng.gen_range(-1.0..=1.0) * self.equalized_noise;
            *sample = self.filter.filter((*sample + noise) * gain);
        }
    }
}

/// Loopback queue and the impairment applied on its capture end
#[derive(Debug)]
struct LinkChannel {
    queue: SampleBuffer,
    impairment: Mutex<LinkImpairment>,
    /// Capture frame length
    input_frame: usize,
}

impl LinkChannel {
    fn transmit(&self, frame: &[Sample]) {
        self.queue.push(frame);
    }

    fn has_frame(&self) -> bool {
        self.queue.len() >= self.input_frame
    }

    /// Take the oldest frame off the queue, zero padded if the queue ran
    /// short, and impair it. Returns the number of queued samples used.
    fn drain_frame(&self, frame: &mut [Sample]) -> usize {
        let taken = self.queue.pop_frame(frame);
        self.impairment.lock().apply(frame);
        taken
    }
}

/// Software loopback port with a simulated lossy link
pub struct LinkSimulatorPort {
    /// Run flag of the current open, replaced on every open
    running: Arc<AtomicBool>,
    /// Receives impaired frames
    input_handler: Arc<Mutex<Option<InputHandler>>>,
    /// Produces frames to send down the link
    output_handler: Arc<Mutex<Option<OutputHandler>>>,
    /// Loopback queue and impairment, set by initialize
    channel: Option<Arc<LinkChannel>>,
    /// Capture frame length and rate
    input: DeviceConfig,
    /// Playback frame length and rate
    output: DeviceConfig,
    /// Capture and playback loops
    threads: Vec<JoinHandle<()>>,
}

impl LinkSimulatorPort {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            input_handler: Arc::new(Mutex::new(None)),
            output_handler: Arc::new(Mutex::new(None)),
            channel: None,
            input: DeviceConfig::default(),
            output: DeviceConfig::default(),
            threads: Vec::new(),
        }
    }

    /// Initialize with a reproducible noise sequence
    pub fn initialize_seeded(&mut self, config: &AppConfig, seed: u64) -> Result<(), AudioError> {
        self.bind(config, |link, rate| LinkImpairment::with_seed(link, rate, seed))
    }

    /// Check if the loops are running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn bind(
        &mut self,
        config: &AppConfig,
        impairment: impl FnOnce(&LinkConfig, f64) -> Result<LinkImpairment, FilterError>,
    ) -> Result<(), AudioError> {
        if self.is_running() {
            return Err(AudioError::AlreadyInitialized);
        }
        validate_device(&config.input, Direction::Input)?;
        validate_device(&config.output, Direction::Output)?;

        let impairment = impairment(&config.link, config.output.sample_rate as f64)?;
        tracing::debug!(
            "Link simulator: {}-{} Hz band-pass of order {}, equalized noise {:.4}",
            config.link.low_cut,
            config.link.high_cut,
            config.link.bpf_order,
            impairment.equalized_noise_level()
        );

        self.input = config.input.clone();
        self.output = config.output.clone();
        self.channel = Some(Arc::new(LinkChannel {
            queue: SampleBuffer::with_capacity(config.input.buffer_size + config.output.buffer_size),
            impairment: Mutex::new(impairment),
            input_frame: config.input.buffer_size,
        }));
        Ok(())
    }

    fn join_threads(&mut self) {
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Link simulator thread panicked");
            }
        }
    }
}

impl Default for LinkSimulatorPort {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioPort for LinkSimulatorPort {
    fn initialize(&mut self, config: &AppConfig) -> Result<(), AudioError> {
        self.bind(config, LinkImpairment::new)
    }

    fn open(&mut self) -> Result<(), AudioError> {
        let channel = self.channel.clone().ok_or(AudioError::NotInitialized)?;
        if self.is_running() {
            return Ok(());
        }
        // Loops left over from a previous open exit within one period
        self.join_threads();
        // Audio queued before a close is not replayed
        channel.queue.clear();

        if self.input_handler.lock().is_none() {
            tracing::warn!("Link simulator opened without an input handler, captured frames are discarded");
        }
        if self.output_handler.lock().is_none() {
            tracing::warn!("Link simulator opened without an output handler, playing silence");
        }

        // A fresh flag per open, so loops from an earlier open never resume
        let running = Arc::new(AtomicBool::new(true));
        self.running = running.clone();

        let capture = {
            let channel = channel.clone();
            let running = running.clone();
            let handler = self.input_handler.clone();
            let frame_len = self.input.buffer_size;
            let pacer = Pacer::new(self.input.frame_period());
            thread::Builder::new()
                .name("link-capture".into())
                .spawn(move || capture_loop(channel, handler, running, frame_len, pacer))
        };
        match capture {
            Ok(handle) => self.threads.push(handle),
            Err(e) => {
                running.store(false, Ordering::SeqCst);
                return Err(AudioError::Thread("link-capture", e.to_string()));
            }
        }

        let playback = {
            let running = running.clone();
            let handler = self.output_handler.clone();
            let frame_len = self.output.buffer_size;
            let pacer = Pacer::new(self.output.frame_period());
            thread::Builder::new()
                .name("link-playback".into())
                .spawn(move || playback_loop(channel, handler, running, frame_len, pacer))
        };
        match playback {
            Ok(handle) => self.threads.push(handle),
            Err(e) => {
                running.store(false, Ordering::SeqCst);
                return Err(AudioError::Thread("link-playback", e.to_string()));
            }
        }

        tracing::info!(
            "Link simulator open: capture {} samples @ {} Hz, playback {} samples @ {} Hz",
            self.input.buffer_size,
            self.input.sample_rate,
            self.output.buffer_size,
            self.output.sample_rate
        );
        Ok(())
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn dispose(&mut self) {
        self.close();
        self.join_threads();
    }

    fn input_callback(&mut self, handler: InputHandler) {
        *self.input_handler.lock() = Some(handler);
    }

    fn output_callback(&mut self, handler: OutputHandler) {
        *self.output_handler.lock() = Some(handler);
    }
}

impl Drop for LinkSimulatorPort {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn validate_device(device: &DeviceConfig, direction: Direction) -> Result<(), AudioError> {
    device
        .validate(direction)
        .map_err(|e| AudioError::InvalidDevice(e.to_string()))
}

fn capture_loop(
    channel: Arc<LinkChannel>,
    handler: Arc<Mutex<Option<InputHandler>>>,
    running: Arc<AtomicBool>,
    frame_len: usize,
    mut pacer: Pacer,
) {
    let mut frame = vec![SILENCE; frame_len];
    while running.load(Ordering::Relaxed) {
        while channel.has_frame() && running.load(Ordering::Relaxed) {
            channel.drain_frame(&mut frame);
            if let Some(handler) = handler.lock().as_mut() {
                handler(&frame[..]);
            }
        }
        pacer.wait();
    }
}

fn playback_loop(
    channel: Arc<LinkChannel>,
    handler: Arc<Mutex<Option<OutputHandler>>>,
    running: Arc<AtomicBool>,
    frame_len: usize,
    mut pacer: Pacer,
) {
    let mut frame = vec![SILENCE; frame_len];
    while running.load(Ordering::Relaxed) {
        frame.fill(SILENCE);
        if let Some(handler) = handler.lock().as_mut() {
            handler(&mut frame[..]);
        }
        channel.transmit(&frame);
        pacer.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::time::Duration;

    /// Frames a single loop of `period` can emit within `window`
    fn max_ticks(window: Duration, period: Duration) -> usize {
        (window.as_secs_f64() / period.as_secs_f64()) as usize + 2
    }

    fn link_config(noise_level: f64) -> AppConfig {
        let mut config = AppConfig::default();
        config.input = DeviceConfig {
            device: String::new(),
            sample_rate: 8000,
            buffer_size: 16,
        };
        config.output = DeviceConfig {
            device: String::new(),
            sample_rate: 8000,
            buffer_size: 24,
        };
        config.link = LinkConfig {
            noise_level,
            low_cut: 300.0,
            high_cut: 3000.0,
            bpf_order: 2,
        };
        config
    }

    fn energy(frame: &[Sample]) -> f64 {
        frame.iter().map(|s| s * s).sum()
    }

    #[test]
    fn test_equalized_noise_level() {
        let link = LinkConfig {
            noise_level: 0.1,
            low_cut: 300.0,
            high_cut: 3000.0,
            bpf_order: 2,
        };
        let impairment = LinkImpairment::with_seed(&link, 8000.0, 1).unwrap();
        let expected = 0.1 * 4000.0 / 2700.0;
        assert!((impairment.equalized_noise_level() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_noise_is_bounded_and_seeded() {
        let link = LinkConfig {
            noise_level: 0.5,
            low_cut: 300.0,
            high_cut: 3000.0,
            bpf_order: 2,
        };
        let mut a = LinkImpairment::with_seed(&link, 8000.0, 7).unwrap();
        let mut b = LinkImpairment::with_seed(&link, 8000.0, 7).unwrap();

        let mut frame_a = vec![0.0; 256];
        let mut frame_b = vec![0.0; 256];
        a.apply(&mut frame_a);
        b.apply(&mut frame_b);

        assert_eq!(frame_a, frame_b);
        assert!(energy(&frame_a) > 0.0);
        assert!(frame_a.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_silence_converges_to_zero() {
        let mut impairment = LinkImpairment::with_seed(&link_config(0.0).link, 8000.0, 3).unwrap();

        let mut excite = vec![1.0; 64];
        impairment.apply(&mut excite);
        assert!(energy(&excite) > 0.0);

        let mut tail = vec![0.0; 64];
        for _ in 0..20 {
            tail.fill(0.0);
            impairment.apply(&mut tail);
        }
        assert!(energy(&tail) < 1e-12);
    }

    #[test]
    fn test_underrun_frame_is_zero_padded() {
        let mut config = link_config(0.0);
        config.link.low_cut = 1.0;
        config.link.high_cut = 3.0;
        config.output.sample_rate = 8;
        let mut port = LinkSimulatorPort::new();
        port.initialize_seeded(&config, 0).unwrap();
        let channel = port.channel.clone().unwrap();

        channel.transmit(&[0.5, -0.5, 0.25]);
        assert!(!channel.has_frame());

        let mut frame = vec![9.0; 16];
        assert_eq!(channel.drain_frame(&mut frame), 3);

        // Expected: the three samples followed by zeros, through the same impairment
        let mut expected = vec![0.0; 16];
        expected[..3].copy_from_slice(&[0.5, -0.5, 0.25]);
        let mut reference = LinkImpairment::with_seed(&config.link, 8.0, 0).unwrap();
        reference.apply(&mut expected);
        assert_eq!(frame, expected);
        assert_eq!(channel.queue.underrun_count(), 1);
    }

    #[test]
    fn test_open_requires_initialize() {
        let mut port = LinkSimulatorPort::new();
        assert!(matches!(port.open(), Err(AudioError::NotInitialized)));
        port.dispose();
    }

    #[test]
    fn test_equal_cuts_rejected() {
        let mut config = link_config(0.0);
        config.link.high_cut = config.link.low_cut;
        let mut port = LinkSimulatorPort::new();
        assert!(matches!(
            port.initialize(&config),
            Err(AudioError::InvalidLink(FilterError::EmptyPassband { .. }))
        ));
    }

    #[test]
    fn test_negative_noise_rejected() {
        let mut port = LinkSimulatorPort::new();
        assert!(matches!(
            port.initialize(&link_config(-1.0)),
            Err(AudioError::InvalidLink(FilterError::NoiseLevel(_)))
        ));
    }

    #[test]
    fn test_frames_have_configured_length() {
        let config = link_config(0.2);
        let (input_tx, input_rx) = unbounded();
        let (output_tx, output_rx) = unbounded();

        let mut port = LinkSimulatorPort::new();
        port.input_callback(Box::new(move |frame| {
            let _ = input_tx.send(frame.len());
        }));
        port.output_callback(Box::new(move |frame| {
            let _ = output_tx.send(frame.len());
            frame.fill(0.1);
        }));
        port.initialize(&config).unwrap();
        port.open().unwrap();
        assert!(port.is_running());

        for _ in 0..10 {
            let len = input_rx.recv_timeout(Duration::from_secs(2)).unwrap();
            assert_eq!(len, 16);
        }
        port.dispose();
        assert!(!port.is_running());

        assert!(input_rx.try_iter().all(|len| len == 16));
        let output_lengths: Vec<usize> = output_rx.try_iter().collect();
        assert!(!output_lengths.is_empty());
        assert!(output_lengths.iter().all(|&len| len == 24));
    }

    #[test]
    fn test_missing_output_handler_loops_back_silence() {
        let (tx, rx) = unbounded();
        let mut port = LinkSimulatorPort::new();
        port.input_callback(Box::new(move |frame| {
            let _ = tx.send(energy(frame));
        }));
        port.initialize(&link_config(0.0)).unwrap();
        port.open().unwrap();

        for _ in 0..5 {
            assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 0.0);
        }
        port.dispose();
    }

    #[test]
    fn test_reopen_after_close() {
        let (tx, rx) = unbounded();
        let mut port = LinkSimulatorPort::new();
        port.input_callback(Box::new(move |_| {
            let _ = tx.send(());
        }));
        port.initialize(&link_config(0.0)).unwrap();

        port.open().unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        port.close();

        port.open().unwrap();
        while rx.try_recv().is_ok() {}
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        port.dispose();
    }

    #[test]
    fn test_initialize_while_running_rejected() {
        let config = link_config(0.0);
        let mut port = LinkSimulatorPort::new();
        port.initialize(&config).unwrap();
        port.open().unwrap();

        assert!(matches!(
            port.initialize(&config),
            Err(AudioError::AlreadyInitialized)
        ));

        port.dispose();
        assert!(port.initialize(&config).is_ok());
    }

    #[test]
    fn test_second_open_keeps_one_set_of_loops() {
        let mut config = link_config(0.0);
        config.output.buffer_size = 80;
        let period = config.output.frame_period();

        let (tx, rx) = unbounded();
        let mut port = LinkSimulatorPort::new();
        port.output_callback(Box::new(move |_| {
            let _ = tx.send(());
        }));
        port.initialize(&config).unwrap();
        port.open().unwrap();
        port.open().unwrap();
        assert_eq!(port.threads.len(), 2);

        while rx.try_recv().is_ok() {}
        let window = Duration::from_millis(300);
        std::thread::sleep(window);
        port.close();
        let calls = rx.try_iter().count();
        port.dispose();

        assert!(calls > 0);
        assert!(
            calls <= max_ticks(window, period),
            "{} playback frames in {:?}",
            calls,
            window
        );
    }

    #[test]
    fn test_reopen_discards_queued_audio() {
        let (tx, rx) = unbounded();
        let mut port = LinkSimulatorPort::new();
        port.input_callback(Box::new(move |frame| {
            let _ = tx.send(energy(frame));
        }));
        port.initialize_seeded(&link_config(0.0), 11).unwrap();

        port.open().unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        port.close();

        // Left in the queue by the previous run
        port.channel.as_ref().unwrap().transmit(&[0.5; 64]);

        port.open().unwrap();
        while rx.try_recv().is_ok() {}
        for _ in 0..4 {
            assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 0.0);
        }
        port.dispose();
    }
}
