//! gossipd server - request dispatch and service lifecycle

use crate::config::Config;
use crate::gossip::{GossipEngine, GossipStats};
use crate::handler::BroadcastHandler;
use crate::seen::{SeenLog, SeenStats};
use crate::topology::Topology;
use async_trait::async_trait;
use rumor_core::error::RpcError;
use rumor_core::types::{Envelope, Payload};
use rumor_net::{Handler, Node, RawEnvelope, Transport};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::info;

/// Protocol handler for broadcast nodes
pub struct BroadcastServer {
    handler: BroadcastHandler,
    topology: Arc<Topology>,
    /// Local counter for `generate`
    next_id: AtomicU64,
}

impl BroadcastServer {
    pub fn new(seen: Arc<SeenLog>, topology: Arc<Topology>) -> Self {
        Self {
            handler: BroadcastHandler::new(seen),
            topology,
            next_id: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Handler for BroadcastServer {
    async fn handle(
        &self,
        node: &Arc<Node>,
        request: &Envelope,
    ) -> Result<Option<Payload>, RpcError> {
        // Requests are addressed to us, so `dest` stands in before init
        let self_id = node.id().unwrap_or(&request.dest);

        match &request.body.payload {
            Payload::Broadcast { message } => {
                self.handler.submit(*message);
                Ok(Some(Payload::BroadcastOk))
            }
            Payload::Read { .. } => Ok(Some(Payload::messages(self.handler.read_all()))),
            Payload::Topology { topology } => {
                self.topology.assign(self_id, topology);
                Ok(Some(Payload::TopologyOk))
            }
            Payload::Gossip { msgs } => {
                if self.topology.is_neighbor(&request.src) {
                    self.handler.on_gossip(&request.src, msgs);
                } else {
                    self.handler.on_stray_gossip(&request.src, msgs);
                }
                Ok(None)
            }
            Payload::Echo { echo } => Ok(Some(Payload::EchoOk { echo: echo.clone() })),
            Payload::Generate => {
                let n = self.next_id.fetch_add(1, Ordering::Relaxed);
                Ok(Some(Payload::GenerateOk {
                    id: format!("{self_id}-{n}"),
                }))
            }
            other => Err(RpcError::not_supported(other.kind())),
        }
    }
}

/// Server state
pub struct Server {
    config: Config,
    node: Arc<Node>,
    seen: Arc<SeenLog>,
    topology: Arc<Topology>,
    engine: Arc<GossipEngine>,
    /// Shutdown signal
    shutdown_tx: broadcast::Sender<()>,
    /// Latched by [`Server::shutdown`] so a signal sent before `run` is kept
    stopping: AtomicBool,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Self {
        let node = Node::new(transport);
        let seen = Arc::new(SeenLog::new());
        let topology = Arc::new(Topology::new());
        let engine = Arc::new(GossipEngine::new(
            seen.clone(),
            topology.clone(),
            &config.gossip(),
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            node,
            seen,
            topology,
            engine,
            shutdown_tx,
            stopping: AtomicBool::new(false),
        }
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Ingestion view over this server's seen set
    pub fn handler(&self) -> BroadcastHandler {
        BroadcastHandler::new(self.seen.clone())
    }

    /// Run until the inbox closes or [`Server::shutdown`] is called
    pub async fn run(&self, inbox: mpsc::Receiver<RawEnvelope>) {
        info!(
            "Starting gossipd (interval {}ms, resend probability {})",
            self.config.gossip_interval_ms, self.config.resend_probability
        );

        let gossip_shutdown = self.shutdown_tx.subscribe();
        let serve_shutdown = self.shutdown_tx.subscribe();
        if self.stopping.load(Ordering::SeqCst) {
            info!("Shutdown requested before start");
            return;
        }

        let gossip_handle = self.engine.spawn(self.node.clone(), gossip_shutdown);

        let handler = Arc::new(BroadcastServer::new(
            self.seen.clone(),
            self.topology.clone(),
        ));
        self.node
            .clone()
            .serve(handler, inbox, serve_shutdown)
            .await;

        // Inbox may have closed on its own; stop the gossip timer either way
        self.shutdown();
        let _ = gossip_handle.await;

        let stats = self.stats();
        info!(
            "Stopped: {} ids seen, {} gossip rounds, {} sends, {} failed",
            stats.seen.seen, stats.gossip.rounds, stats.gossip.sends, stats.gossip.failures
        );
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }

    /// Get server statistics
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            neighbors: self.topology.neighbors().map_or(0, <[_]>::len),
            seen: self.seen.stats(),
            gossip: self.engine.stats(),
        }
    }
}

/// Server statistics
#[derive(Debug, Clone)]
pub struct ServerStats {
    pub neighbors: usize,
    pub seen: SeenStats,
    pub gossip: GossipStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use rumor_core::types::{Body, MessageId, NodeId};
    use rumor_net::MemoryNetwork;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn test_config() -> Config {
        Config::try_parse_from(["gossipd", "--gossip-interval-ms", "10", "--seed", "7"]).unwrap()
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
    fn test_server_creation() {
        let network = MemoryNetwork::new(8);
        let (transport, _inbox) = network.register("n1".into());
        let server = Server::new(test_config(), transport);

        let stats = server.stats();
        assert_eq!(stats.neighbors, 0);
        assert_eq!(stats.seen.seen, 0);
        assert!(!server.node().is_ready());
    }

    #[tokio::test]
    async fn test_shutdown_before_run_is_kept() {
        let network = MemoryNetwork::new(8);
        let (transport, _inbox) = network.register("n1".into());
        let server = Server::new(test_config(), transport);
        let (_tx, rx) = mpsc::channel(1);

        server.shutdown();
        tokio::time::timeout(Duration::from_secs(5), server.run(rx))
            .await
            .expect("run returns when shutdown preceded it");
        assert_eq!(server.stats().gossip.rounds, 0);
    }

    #[tokio::test]
    async fn test_broadcast_read_topology() {
        let network = MemoryNetwork::new(64);
        let (transport, inbox) = network.register("n1".into());
        let (_client, mut client_rx) = network.register("c1".into());
        let server = Arc::new(Server::new(test_config(), transport));
        let runner = server.clone();
        let run = tokio::spawn(async move { runner.run(inbox).await });

        let reply = request(&network, &mut client_rx, 1, Payload::Init {
            node_id: "n1".into(),
            node_ids: vec![NodeId::from("n1")],
        })
        .await;
        assert_eq!(reply.body["type"], "init_ok");

        let reply = request(&network, &mut client_rx, 2, Payload::Topology {
            topology: [(NodeId::from("n1"), vec![])].into_iter().collect(),
        })
        .await;
        assert_eq!(reply.body["type"], "topology_ok");

        for (msg_id, message) in [(3, 5), (4, 5), (5, 6)] {
            let reply = request(&network, &mut client_rx, msg_id, Payload::Broadcast {
                message: MessageId(message),
            })
            .await;
            assert_eq!(reply.body, json!({"type": "broadcast_ok", "in_reply_to": msg_id}));
        }

        let reply = request(&network, &mut client_rx, 6, Payload::Read { key: None }).await;
        assert_eq!(reply.body["messages"], json!([5, 6]));
        assert_eq!(
            server.handler().read_all(),
            BTreeSet::from([MessageId(5), MessageId(6)])
        );

        let reply = request(&network, &mut client_rx, 7, Payload::Add { delta: 1 }).await;
        assert_eq!(reply.body["code"], 10);

        server.shutdown();
        run.await.unwrap();
    }

    fn raw(src: &str, body: serde_json::Value) -> RawEnvelope {
        Envelope::new(src.into(), "n1".into(), body)
    }

    async fn next_reply(client: &mut mpsc::Receiver<RawEnvelope>) -> serde_json::Value {
        tokio::time::timeout(Duration::from_secs(5), client.recv())
            .await
            .unwrap()
            .unwrap()
            .body
    }

    #[tokio::test]
    async fn test_malformed_broadcast_changes_nothing() {
        let network = MemoryNetwork::new(64);
        let (transport, _inbox) = network.register("n1".into());
        let (_client, mut client_rx) = network.register("c1".into());
        let server = Arc::new(Server::new(test_config(), transport));
        let (tx, rx) = mpsc::channel(16);
        let runner = server.clone();
        let run = tokio::spawn(async move { runner.run(rx).await });

        tx.send(raw("c1", json!({"type": "broadcast", "message": "x", "msg_id": 9})))
            .await
            .unwrap();
        let reply = next_reply(&mut client_rx).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["code"], 12);
        assert_eq!(reply["in_reply_to"], 9);

        tx.send(raw("c1", json!({"type": "read", "msg_id": 10})))
            .await
            .unwrap();
        let reply = next_reply(&mut client_rx).await;
        assert_eq!(reply, json!({"type": "read_ok", "messages": [], "in_reply_to": 10}));
        assert_eq!(server.stats().seen.seen, 0);

        server.shutdown();
        run.await.unwrap();
    }

    #[tokio::test]
    async fn test_only_neighbors_are_credited_with_acks() {
        let network = MemoryNetwork::new(64);
        let (transport, _inbox) = network.register("n1".into());
        let (_client, mut client_rx) = network.register("c1".into());
        let server = Arc::new(Server::new(test_config(), transport));
        let (tx, rx) = mpsc::channel(16);
        let runner = server.clone();
        let run = tokio::spawn(async move { runner.run(rx).await });

        tx.send(raw("c1", json!({"type": "init", "msg_id": 1, "node_id": "n1", "node_ids": ["n1", "n2"]})))
            .await
            .unwrap();
        assert_eq!(next_reply(&mut client_rx).await["type"], "init_ok");
        tx.send(raw("c1", json!({"type": "topology", "msg_id": 2, "topology": {"n1": ["n2"], "n2": ["n1"]}})))
            .await
            .unwrap();
        assert_eq!(next_reply(&mut client_rx).await["type"], "topology_ok");

        tx.send(raw("c7", json!({"type": "gossip", "msgs": [1]})))
            .await
            .unwrap();
        tx.send(raw("n2", json!({"type": "gossip", "msgs": [2]})))
            .await
            .unwrap();
        tx.send(raw("c1", json!({"type": "read", "msg_id": 3})))
            .await
            .unwrap();

        // Handlers run on their own tasks, so wait for both gossips to land
        let mut messages = next_reply(&mut client_rx).await["messages"].clone();
        for msg_id in 4..100 {
            if messages == json!([1, 2]) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send(raw("c1", json!({"type": "read", "msg_id": msg_id})))
                .await
                .unwrap();
            messages = next_reply(&mut client_rx).await["messages"].clone();
        }
        assert_eq!(messages, json!([1, 2]));

        let seen = server.stats().seen;
        assert_eq!(seen.peers_tracked, 1);
        assert_eq!(seen.acks, 1);

        server.shutdown();
        run.await.unwrap();
    }

    #[tokio::test]
    async fn test_generate_ids_are_unique() {
        let network = MemoryNetwork::new(64);
        let (transport, inbox) = network.register("n1".into());
        let (_client, mut client_rx) = network.register("c1".into());
        let server = Arc::new(Server::new(test_config(), transport));
        let runner = server.clone();
        let run = tokio::spawn(async move { runner.run(inbox).await });

        let mut ids = BTreeSet::new();
        for msg_id in 1..=20 {
            let reply = request(&network, &mut client_rx, msg_id, Payload::Generate).await;
            let id = reply.body["id"].as_str().unwrap().to_string();
            assert!(id.starts_with("n1-"));
            ids.insert(id);
        }
        assert_eq!(ids.len(), 20);

        server.shutdown();
        run.await.unwrap();
    }
}
