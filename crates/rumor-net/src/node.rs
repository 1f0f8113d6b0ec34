//! Node runtime
//!
//! A [`Node`] owns the process identity assigned by `init`, allocates
//! message ids, correlates RPC replies with their waiters and dispatches
//! every other inbound request to a [`Handler`] on its own task.

use crate::framing::RawEnvelope;
use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use rumor_core::error::RpcError;
use rumor_core::types::{Body, Envelope, NodeId, Payload};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

/// Node runtime errors
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Node not initialized")]
    NotReady,
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("RPC to {dest} timed out")]
    Timeout { dest: NodeId },
    #[error("RPC waiter dropped")]
    Cancelled,
}

/// Identity assigned by the `init` message
#[derive(Clone, Debug)]
pub struct Identity {
    pub id: NodeId,
    pub node_ids: Vec<NodeId>,
}

/// Request handler plugged into [`Node::serve`]
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Called once, after the node learns its identity
    async fn on_init(&self, _node: Arc<Node>) {}

    /// Handle one request. `Ok(Some(_))` is sent back as the reply, an
    /// `Err` becomes an `error` reply.
    async fn handle(
        &self,
        node: &Arc<Node>,
        request: &Envelope,
    ) -> Result<Option<Payload>, RpcError>;
}

/// Removes an RPC waiter however the call ends
struct PendingGuard<'a> {
    node: &'a Node,
    msg_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.node.pending.lock().remove(&self.msg_id);
    }
}

pub struct Node {
    identity: OnceLock<Identity>,
    transport: Arc<dyn Transport>,
    next_msg_id: AtomicU64,
    /// Outstanding RPCs: msg_id -> waiter
    pending: Mutex<HashMap<u64, oneshot::Sender<Body>>>,
}

impl Node {
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self {
            identity: OnceLock::new(),
            transport,
            next_msg_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Assign identity. Only the first call has an effect.
    pub fn init(&self, id: NodeId, node_ids: Vec<NodeId>) -> bool {
        self.identity.set(Identity { id, node_ids }).is_ok()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.get()
    }

    /// Our node id, once initialized
    pub fn id(&self) -> Option<&NodeId> {
        self.identity.get().map(|identity| &identity.id)
    }

    pub fn is_ready(&self) -> bool {
        self.identity.get().is_some()
    }

    fn next_msg_id(&self) -> u64 {
        self.next_msg_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Number of RPCs awaiting a reply
    pub fn pending_rpcs(&self) -> usize {
        self.pending.lock().len()
    }

    /// Send a one-way message
    pub fn send(&self, dest: &NodeId, payload: Payload) -> Result<(), NodeError> {
        let src = self.id().ok_or(NodeError::NotReady)?.clone();
        self.transport
            .send(Envelope::new(src, dest.clone(), Body::oneway(payload)))?;
        Ok(())
    }

    /// Reply to a request. Requests without a `msg_id` expect no reply.
    pub fn reply(&self, request: &Envelope, payload: Payload) -> Result<(), NodeError> {
        let Some(msg_id) = request.body.msg_id else {
            debug!("Not replying to {} from {}: no msg_id", request.kind(), request.src);
            return Ok(());
        };
        self.transport.send(Envelope::new(
            request.dest.clone(),
            request.src.clone(),
            Body::reply(msg_id, payload),
        ))?;
        Ok(())
    }

    /// Send a request and wait for the correlated reply body
    pub async fn rpc(
        &self,
        dest: &NodeId,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Body, NodeError> {
        let src = self.id().ok_or(NodeError::NotReady)?.clone();
        let msg_id = self.next_msg_id();
        let (tx, rx) = oneshot::channel();

        self.pending.lock().insert(msg_id, tx);
        let _guard = PendingGuard { node: self, msg_id };

        self.transport.send(Envelope::new(
            src,
            dest.clone(),
            Body::request(msg_id, payload),
        ))?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(_)) => Err(NodeError::Cancelled),
            Err(_) => Err(NodeError::Timeout { dest: dest.clone() }),
        }
    }

    /// Run the dispatch loop until the inbox closes or shutdown fires
    pub async fn serve<H: Handler>(
        self: Arc<Self>,
        handler: Arc<H>,
        mut inbox: mpsc::Receiver<RawEnvelope>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                raw = inbox.recv() => match raw {
                    Some(raw) => self.dispatch(&handler, raw),
                    None => {
                        info!("Inbox closed");
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    info!("Dispatch loop shutting down");
                    break;
                }
            }
        }
    }

    fn dispatch<H: Handler>(self: &Arc<Self>, handler: &Arc<H>, raw: RawEnvelope) {
        let Envelope { src, dest, body } = raw;
        let msg_id = body.get("msg_id").and_then(serde_json::Value::as_u64);

        let body = match serde_json::from_value::<Body>(body) {
            Ok(body) => body,
            Err(e) => {
                warn!("Malformed message from {}: {}", src, e);
                if let Some(msg_id) = msg_id {
                    let error = RpcError::malformed(e.to_string()).into_payload();
                    let reply = Envelope::new(dest, src, Body::reply(msg_id, error));
                    if let Err(e) = self.transport.send(reply) {
                        warn!("Failed to send error reply: {}", e);
                    }
                }
                return;
            }
        };
        let envelope = Envelope::new(src, dest, body);

        if let Some(in_reply_to) = envelope.body.in_reply_to {
            let waiter = self.pending.lock().remove(&in_reply_to);
            match waiter {
                Some(waiter) => {
                    let _ = waiter.send(envelope.body);
                }
                None => debug!(
                    "Ignoring {} from {}: no pending request {}",
                    envelope.kind(),
                    envelope.src,
                    in_reply_to
                ),
            }
            return;
        }

        if let Payload::Init { node_id, node_ids } = &envelope.body.payload {
            let fresh = self.init(node_id.clone(), node_ids.clone());
            if let Err(e) = self.reply(&envelope, Payload::InitOk) {
                warn!("Failed to acknowledge init: {}", e);
            }
            if fresh {
                info!("Initialized as {} ({} nodes)", node_id, node_ids.len());
                let node = self.clone();
                let handler = handler.clone();
                tokio::spawn(async move { handler.on_init(node).await });
            } else {
                debug!("Ignoring repeated init from {}", envelope.src);
            }
            return;
        }

        let node = self.clone();
        let handler = handler.clone();
        tokio::spawn(async move {
            let payload = match handler.handle(&node, &envelope).await {
                Ok(Some(payload)) => payload,
                Ok(None) => return,
                Err(e) => {
                    debug!("{} from {} failed: {}", envelope.kind(), envelope.src, e);
                    e.into_payload()
                }
            };
            if let Err(e) = node.reply(&envelope, payload) {
                warn!("Failed to reply to {}: {}", envelope.src, e);
            }
        });
    }
}
