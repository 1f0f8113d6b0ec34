//! Fire-and-forget transports
//!
//! A [`Transport`] only queues an envelope; it never waits for the peer.
//! Delivery failures surface immediately as [`TransportError`] so callers
//! can log and move on.

use crate::framing::{EnvelopeCodec, FrameError, RawEnvelope};
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rumor_core::types::{Envelope, NodeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, warn};

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Outbox full")]
    OutboxFull,
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("Peer not found: {0}")]
    PeerNotFound(NodeId),
}

impl<T> From<TrySendError<T>> for TransportError {
    fn from(err: TrySendError<T>) -> Self {
        match err {
            TrySendError::Full(_) => Self::OutboxFull,
            TrySendError::Closed(_) => Self::ConnectionClosed,
        }
    }
}

/// Outbound half of a node's connection to the world
pub trait Transport: Send + Sync {
    /// Queue an envelope for delivery without waiting for it to be written
    fn send(&self, envelope: Envelope) -> Result<(), TransportError>;
}

/// Transport over the process's stdin/stdout
pub struct StdioTransport {
    tx: mpsc::Sender<Envelope>,
}

impl StdioTransport {
    /// Start the stdout writer and stdin reader tasks.
    ///
    /// Returns the transport and the inbox of raw inbound envelopes. The
    /// inbox closes when stdin reaches EOF.
    pub fn spawn(capacity: usize) -> (Arc<Self>, mpsc::Receiver<RawEnvelope>) {
        let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(capacity);
        tokio::spawn(async move {
            let mut writer = FramedWrite::new(tokio::io::stdout(), EnvelopeCodec::new());
            while let Some(envelope) = out_rx.recv().await {
                if let Err(e) = writer.send(envelope).await {
                    error!("Failed to write envelope: {}", e);
                    break;
                }
            }
        });

        let (in_tx, in_rx) = mpsc::channel(capacity);
        tokio::spawn(async move {
            let mut reader = FramedRead::new(tokio::io::stdin(), EnvelopeCodec::new());
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(Ok(envelope)) => {
                        if in_tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Ok(Err(e)) => warn!("Dropping undecodable line: {}", e),
                    Err(e) => {
                        error!("Input stream error: {}", e);
                        break;
                    }
                }
            }
            debug!("Input closed");
        });

        (Arc::new(Self { tx: out_tx }), in_rx)
    }
}

impl Transport for StdioTransport {
    fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        Ok(self.tx.try_send(envelope)?)
    }
}

/// In-process network routing envelopes between registered nodes.
///
/// Envelopes sent through a node's [`MemoryTransport`] may be dropped with
/// a fixed, seeded probability. Envelopes handed to [`MemoryNetwork::inject`]
/// are never dropped.
pub struct MemoryNetwork {
    routes: RwLock<HashMap<NodeId, mpsc::Sender<RawEnvelope>>>,
    loss: Mutex<Option<(f64, StdRng)>>,
    capacity: usize,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl MemoryNetwork {
    /// Create a lossless network
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            routes: RwLock::new(HashMap::new()),
            loss: Mutex::new(None),
            capacity,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    /// Create a network that drops each node-sent envelope with `probability`
    pub fn with_loss(capacity: usize, probability: f64, seed: u64) -> Arc<Self> {
        let network = Self::new(capacity);
        *network.loss.lock() = Some((probability, StdRng::seed_from_u64(seed)));
        network
    }

    /// Attach a node or client, returning its transport and inbox
    pub fn register(
        self: &Arc<Self>,
        id: NodeId,
    ) -> (Arc<MemoryTransport>, mpsc::Receiver<RawEnvelope>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.routes.write().insert(id, tx);
        (
            Arc::new(MemoryTransport {
                network: self.clone(),
            }),
            rx,
        )
    }

    /// Detach a node; later sends to it fail with `PeerNotFound`
    pub fn unregister(&self, id: &NodeId) {
        self.routes.write().remove(id);
    }

    /// Deliver without loss (test clients)
    pub fn inject(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.route(envelope)
    }

    /// Envelopes routed so far
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Envelopes dropped by simulated loss
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn lose(&self) -> bool {
        match self.loss.lock().as_mut() {
            Some((probability, rng)) => rng.gen_bool(*probability),
            None => false,
        }
    }

    fn route(&self, envelope: Envelope) -> Result<(), TransportError> {
        let route = self
            .routes
            .read()
            .get(&envelope.dest)
            .cloned()
            .ok_or_else(|| TransportError::PeerNotFound(envelope.dest.clone()))?;

        let body = serde_json::to_value(&envelope.body).map_err(FrameError::from)?;
        route.try_send(Envelope::new(envelope.src, envelope.dest, body))?;
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// A node's handle onto a [`MemoryNetwork`]
pub struct MemoryTransport {
    network: Arc<MemoryNetwork>,
}

impl Transport for MemoryTransport {
    fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        if self.network.lose() {
            self.network.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        self.network.route(envelope)
    }
}
