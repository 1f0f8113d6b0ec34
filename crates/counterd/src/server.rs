//! counterd server - request dispatch and service lifecycle

use crate::config::{Backend, Config};
use crate::counter::{CounterError, CounterStats, GrowCounter};
use crate::kv::{KvClient, KvError, RemoteKv, SledKv};
use async_trait::async_trait;
use rumor_core::error::{ErrorCode, RpcError};
use rumor_core::types::{Envelope, NodeId, Payload};
use rumor_net::{Handler, Node, RawEnvelope, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::info;

impl From<CounterError> for RpcError {
    fn from(err: CounterError) -> Self {
        match err {
            CounterError::NegativeDelta(_) => RpcError::malformed(err.to_string()),
            CounterError::Overflow { .. } => RpcError::new(ErrorCode::Abort, err.to_string()),
            CounterError::Store(KvError::Timeout) => RpcError::timeout(err.to_string()),
            CounterError::Store(_) => RpcError::unavailable(err.to_string()),
        }
    }
}

/// Protocol handler for counter nodes
pub struct CounterServer {
    counter: Arc<GrowCounter>,
}

impl CounterServer {
    pub fn new(counter: Arc<GrowCounter>) -> Self {
        Self { counter }
    }
}

#[async_trait]
impl Handler for CounterServer {
    async fn on_init(&self, _node: Arc<Node>) {
        self.counter.init().await;
    }

    async fn handle(
        &self,
        _node: &Arc<Node>,
        request: &Envelope,
    ) -> Result<Option<Payload>, RpcError> {
        match &request.body.payload {
            Payload::Add { delta } => {
                self.counter.add(*delta).await?;
                Ok(Some(Payload::AddOk))
            }
            Payload::Read { .. } => Ok(Some(Payload::value(self.counter.read().await?))),
            Payload::Echo { echo } => Ok(Some(Payload::EchoOk { echo: echo.clone() })),
            other => Err(RpcError::not_supported(other.kind())),
        }
    }
}

/// Server state
pub struct Server {
    config: Config,
    node: Arc<Node>,
    counter: Arc<GrowCounter>,
    /// Shutdown signal
    shutdown_tx: broadcast::Sender<()>,
    /// Latched by [`Server::shutdown`] so a signal sent before `run` is kept
    stopping: AtomicBool,
}

impl Server {
    /// Create a new server instance, opening the configured store
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Result<Self, KvError> {
        let node = Node::new(transport);
        let kv: Arc<dyn KvClient> = match config.backend {
            Backend::Remote => Arc::new(RemoteKv::new(
                node.clone(),
                NodeId::new(config.kv_service.clone()),
                config.io_timeout(),
            )),
            Backend::Sled => Arc::new(match &config.data_dir {
                Some(path) => SledKv::open(path)?,
                None => SledKv::temporary()?,
            }),
        };
        Ok(Self::with_store(config, node, kv))
    }

    /// Create a server over an already opened store
    pub fn with_store(config: Config, node: Arc<Node>, kv: Arc<dyn KvClient>) -> Self {
        let counter = Arc::new(GrowCounter::new(
            kv,
            config.key.clone(),
            config.io_timeout(),
            config.retry_policy(),
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            node,
            counter,
            shutdown_tx,
            stopping: AtomicBool::new(false),
        }
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn counter(&self) -> &Arc<GrowCounter> {
        &self.counter
    }

    /// Run until the inbox closes or [`Server::shutdown`] is called
    pub async fn run(&self, inbox: mpsc::Receiver<RawEnvelope>) {
        info!(
            "Starting counterd (key {}, backend {:?})",
            self.config.key, self.config.backend
        );

        let shutdown = self.shutdown_tx.subscribe();
        if self.stopping.load(Ordering::SeqCst) {
            info!("Shutdown requested before start");
            return;
        }

        let handler = Arc::new(CounterServer::new(self.counter.clone()));
        self.node.clone().serve(handler, inbox, shutdown).await;

        let stats = self.stats();
        info!(
            "Stopped: {} adds applied, {} CAS conflicts",
            stats.applied, stats.conflicts
        );
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }

    /// Get server statistics
    pub fn stats(&self) -> CounterStats {
        self.counter.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use rumor_core::types::{Body, MessageId};
    use rumor_net::MemoryNetwork;
    use serde_json::json;
    use std::time::Duration;

    fn sled_config() -> Config {
        Config::try_parse_from(["counterd", "--backend", "sled"]).unwrap()
    }

    async fn request(
        network: &Arc<MemoryNetwork>,
        client: &mut mpsc::Receiver<RawEnvelope>,
        msg_id: u64,
        payload: Payload,
    ) -> RawEnvelope {
        network
            .inject(Envelope::new(
                "c1".into(),
                "n1".into(),
                Body::request(msg_id, payload),
            ))
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), client.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_error_codes() {
        let code = |err: CounterError| RpcError::from(err).code;
        assert_eq!(code(CounterError::NegativeDelta(-1)), ErrorCode::MalformedRequest);
        assert_eq!(code(CounterError::Store(KvError::Timeout)), ErrorCode::Timeout);
        assert_eq!(
            code(CounterError::Store(KvError::Transport("down".into()))),
            ErrorCode::TemporarilyUnavailable
        );
        assert_eq!(
            code(CounterError::Overflow { current: i64::MAX, delta: 1 }),
            ErrorCode::Abort
        );
    }

    #[tokio::test]
    async fn test_shutdown_before_run_is_kept() {
        let network = MemoryNetwork::new(8);
        let (transport, _inbox) = network.register("n1".into());
        let server = Server::new(sled_config(), transport).unwrap();
        let (_tx, rx) = mpsc::channel(1);

        server.shutdown();
        tokio::time::timeout(Duration::from_secs(5), server.run(rx))
            .await
            .expect("run returns when shutdown preceded it");
    }

    #[tokio::test]
    async fn test_add_and_read() {
        let network = MemoryNetwork::new(64);
        let (transport, inbox) = network.register("n1".into());
        let (_client, mut client_rx) = network.register("c1".into());
        let server = Arc::new(Server::new(sled_config(), transport).unwrap());
        let runner = server.clone();
        let run = tokio::spawn(async move { runner.run(inbox).await });

        let reply = request(&network, &mut client_rx, 1, Payload::Init {
            node_id: "n1".into(),
            node_ids: vec![NodeId::from("n1")],
        })
        .await;
        assert_eq!(reply.body["type"], "init_ok");

        let reply = request(&network, &mut client_rx, 2, Payload::Read { key: None }).await;
        assert_eq!(reply.body, json!({"type": "read_ok", "value": 0, "in_reply_to": 2}));

        for (msg_id, delta) in [(3, 3), (4, 4), (5, 0)] {
            let reply = request(&network, &mut client_rx, msg_id, Payload::Add { delta }).await;
            assert_eq!(reply.body, json!({"type": "add_ok", "in_reply_to": msg_id}));
        }

        let reply = request(&network, &mut client_rx, 6, Payload::Read { key: None }).await;
        assert_eq!(reply.body["value"], 7);

        let reply = request(&network, &mut client_rx, 7, Payload::Add { delta: -2 }).await;
        assert_eq!(reply.body["type"], "error");
        assert_eq!(reply.body["code"], 12);

        let reply = request(&network, &mut client_rx, 8, Payload::Broadcast {
            message: MessageId(1),
        })
        .await;
        assert_eq!(reply.body["code"], 10);

        assert_eq!(server.stats().applied, 2);
        server.shutdown();
        run.await.unwrap();
    }
}
