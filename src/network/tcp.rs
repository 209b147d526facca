//! TCP broadcast server
//!
//! Stream mode: raw bytes in both directions, no framing. Everything passed
//! to [`BroadcastServer::broadcast`] goes to every connected peer; every
//! chunk read from any peer is handed to the receive handler.
//!
//! `broadcast` is synchronous and never waits on a peer, so it can be called
//! straight from a capture loop. Each peer has a bounded queue drained by its
//! own task; a peer that falls behind loses chunks rather than stalling
//! capture.

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

use crate::constants::{PEER_QUEUE_CAPACITY, READ_BUFFER_SIZE};
use crate::error::NetworkError;

/// Called with every chunk read from a peer
pub type ReceiveHandler = Arc<dyn Fn(SocketAddr, &[u8]) + Send + Sync>;

#[derive(Debug, Default)]
struct Counters {
    connections: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    dropped_chunks: AtomicU64,
}

/// Server statistics
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub connections: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub dropped_chunks: u64,
}

/// Broadcasting TCP server
pub struct BroadcastServer {
    /// Port to bind, 0 for any free port
    port: u16,
    /// Outgoing queue of every connected peer
    peers: Arc<DashMap<SocketAddr, mpsc::Sender<Bytes>>>,
    /// Handler for bytes read from peers
    on_receive: Arc<RwLock<Option<ReceiveHandler>>>,
    /// Stops the accept loop and peer tasks of the current run
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    /// Lock-free view of whether `shutdown` is armed, checked by `broadcast`
    running: AtomicBool,
    counters: Arc<Counters>,
}

impl BroadcastServer {
    /// Create a server for `port`; 0 picks a free port at start
    pub fn new(port: u16) -> Self {
        Self {
            port,
            peers: Arc::new(DashMap::new()),
            on_receive: Arc::new(RwLock::new(None)),
            shutdown: Mutex::new(None),
            running: AtomicBool::new(false),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Set the handler for bytes read from peers, replacing any previous one
    pub fn on_receive(&self, handler: impl Fn(SocketAddr, &[u8]) + Send + Sync + 'static) {
        *self.on_receive.write() = Some(Arc::new(handler));
    }

    /// Bind and start accepting peers. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr, NetworkError> {
        let listener = TcpListener::bind(("0.0.0.0", self.port))
            .await
            .map_err(|e| NetworkError::BindFailed(format!("port {}: {}", self.port, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        if let Some(previous) = self.shutdown.lock().replace(shutdown_tx) {
            let _ = previous.send(true);
        }
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(accept_loop(
            listener,
            self.peers.clone(),
            self.on_receive.clone(),
            self.counters.clone(),
            shutdown_rx,
        ));

        tracing::info!("TCP server listening on {}", local_addr);
        Ok(local_addr)
    }

    /// Queue `bytes` for every connected peer.
    ///
    /// Peers with a full queue miss this chunk and are reported as failed;
    /// peers whose connection has ended are dropped.
    pub fn broadcast(&self, bytes: Bytes) -> Result<(), NetworkError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(NetworkError::NotRunning);
        }

        let mut failed = 0;
        let mut closed = Vec::new();
        for peer in self.peers.iter() {
            match peer.value().try_send(bytes.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => failed += 1,
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*peer.key()),
            }
        }
        let peers = self.peers.len();
        for addr in closed {
            self.peers.remove(&addr);
        }

        if failed > 0 {
            self.counters
                .dropped_chunks
                .fetch_add(failed as u64, Ordering::Relaxed);
            return Err(NetworkError::SendFailed { failed, peers });
        }
        Ok(())
    }

    /// Stop accepting and disconnect every peer
    pub fn stop(&self) {
        if let Some(shutdown) = self.shutdown.lock().take() {
            self.running.store(false, Ordering::SeqCst);
            let _ = shutdown.send(true);
            self.peers.clear();
            tracing::info!("TCP server stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            connections: self.counters.connections.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            dropped_chunks: self.counters.dropped_chunks.load(Ordering::Relaxed),
        }
    }
}

impl Drop for BroadcastServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: TcpListener,
    peers: Arc<DashMap<SocketAddr, mpsc::Sender<Bytes>>>,
    on_receive: Arc<RwLock<Option<ReceiveHandler>>>,
    counters: Arc<Counters>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                    }
                    let (tx, rx) = mpsc::channel(PEER_QUEUE_CAPACITY);
                    peers.insert(addr, tx);
                    counters.connections.fetch_add(1, Ordering::Relaxed);
                    tracing::info!("Peer {} connected", addr);

                    tokio::spawn(serve_peer(
                        stream,
                        addr,
                        rx,
                        peers.clone(),
                        on_receive.clone(),
                        counters.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => tracing::warn!("Accept failed: {}", e),
            },
            _ = shutdown.changed() => break,
        }
    }
}

async fn serve_peer(
    stream: TcpStream,
    addr: SocketAddr,
    mut outgoing: mpsc::Receiver<Bytes>,
    peers: Arc<DashMap<SocketAddr, mpsc::Sender<Bytes>>>,
    on_receive: Arc<RwLock<Option<ReceiveHandler>>>,
    counters: Arc<Counters>,
    mut shutdown: watch::Receiver<bool>,
) {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    counters.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                    let handler = on_receive.read().clone();
                    if let Some(handler) = handler {
                        handler(addr, &buf[..n]);
                    }
                }
                Err(e) => {
                    tracing::warn!("Read from {} failed: {}", addr, e);
                    break;
                }
            },
            chunk = outgoing.recv() => match chunk {
                Some(bytes) => {
                    if let Err(e) = writer.write_all(&bytes).await {
                        tracing::warn!("Write to {} failed: {}", addr, e);
                        break;
                    }
                    counters.bytes_sent.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                }
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }

    peers.remove(&addr);
    tracing::info!("Peer {} disconnected", addr);
}
