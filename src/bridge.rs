//! Wiring between an audio port and the network

use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::AudioPort;
use crate::codec::encode_f64_le_into;
use crate::config::AppConfig;
use crate::constants::BROADCAST_WARN_INTERVAL_MS;
use crate::error::NetworkError;
use crate::network::{BroadcastServer, ElasticBuffer};

/// Connects one port to one server through an elastic buffer.
///
/// - captured frames are encoded as f64 and broadcast to every peer,
/// - bytes from peers go into the elastic buffer,
/// - playback frames are drained from the elastic buffer, silence padded.
pub struct Bridge {
    server: Arc<BroadcastServer>,
    elastic: Arc<ElasticBuffer>,
}

impl Bridge {
    pub fn new(server: Arc<BroadcastServer>) -> Self {
        Self {
            server,
            elastic: Arc::new(ElasticBuffer::new()),
        }
    }

    /// Start the server, wire `port` to it, then initialize and open the port.
    /// Returns the address peers connect to.
    pub async fn start(
        &self,
        port: &mut dyn AudioPort,
        config: &AppConfig,
    ) -> crate::Result<SocketAddr> {
        let addr = self.server.start().await?;
        self.wire(port);

        tracing::info!("Initializing {} port", config.backend);
        port.initialize(config)?;
        port.open()?;
        Ok(addr)
    }

    /// Install the handlers on `port` and on the server
    pub fn wire(&self, port: &mut dyn AudioPort) {
        let playback = self.elastic.clone();
        port.output_callback(Box::new(move |frame| {
            playback.fill_frame(frame);
        }));

        let uplink = self.server.clone();
        let mut scratch = BytesMut::new();
        let mut failures = FailureReport::new(Duration::from_millis(BROADCAST_WARN_INTERVAL_MS));
        port.input_callback(Box::new(move |frame| {
            let chunk = encode_f64_le_into(frame, &mut scratch);
            if let Err(e) = uplink.broadcast(chunk) {
                failures.record(&e);
            }
        }));

        let downlink = self.elastic.clone();
        self.server.on_receive(move |_, bytes| downlink.put(bytes));
    }

    pub fn elastic(&self) -> &Arc<ElasticBuffer> {
        &self.elastic
    }

    pub fn server(&self) -> &Arc<BroadcastServer> {
        &self.server
    }
}

/// Throttles broadcast failure warnings to one per interval
struct FailureReport {
    interval: Duration,
    last_warned: Option<Instant>,
    suppressed: u64,
}

impl FailureReport {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_warned: None,
            suppressed: 0,
        }
    }

    /// Returns true when the failure was logged
    fn record(&mut self, error: &NetworkError) -> bool {
        let now = Instant::now();
        let due = self
            .last_warned
            .map_or(true, |last| now.duration_since(last) >= self.interval);
        if !due {
            self.suppressed += 1;
            return false;
        }

        if self.suppressed > 0 {
            tracing::warn!("Broadcast failed: {} ({} more since last report)", error, self.suppressed);
        } else {
            tracing::warn!("Broadcast failed: {}", error);
        }
        self.last_warned = Some(now);
        self.suppressed = 0;
        true
    }
}
