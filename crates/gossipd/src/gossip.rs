//! Periodic gossip dissemination with anti-entropy resends
//!
//! Every round, each neighbor is sent the ids it has not acknowledged plus a
//! random sample of the ones it has. The sample repairs neighbors that lost
//! state (e.g. restarted) without a separate repair protocol. Sends are
//! fire-and-forget; acknowledgement arrives implicitly through the
//! neighbor's own gossip.

use crate::seen::{Sampler, SeenLog};
use crate::topology::Topology;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rumor_core::types::{MessageId, NodeId, Payload};
use rumor_net::Node;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

/// Default resend probability for acknowledged ids
pub const DEFAULT_RESEND_PROBABILITY: f64 = 0.3;

/// Gossip errors. Both mean "not ready yet" and defer the round.
#[derive(Debug, Error)]
pub enum GossipError {
    #[error("Node not initialized")]
    NotReady,
    #[error("Topology not assigned")]
    NoTopology,
}

/// Gossip engine settings
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Time between rounds
    pub interval: Duration,
    /// Chance that an acknowledged id is resent in a round
    pub resend_probability: f64,
    /// Seed for the resend sampler; entropy when absent
    pub seed: Option<u64>,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(200),
            resend_probability: DEFAULT_RESEND_PROBABILITY,
            seed: None,
        }
    }
}

/// Resends each acknowledged id independently with a fixed probability
pub struct RandomSampler {
    rng: StdRng,
    probability: f64,
}

impl RandomSampler {
    pub fn new(probability: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        // NaN would make every draw panic
        let probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        Self { rng, probability }
    }
}

impl Sampler for RandomSampler {
    fn resend(&mut self, _id: MessageId) -> bool {
        self.rng.gen_bool(self.probability)
    }
}

/// Gossip dissemination engine
pub struct GossipEngine {
    seen: Arc<SeenLog>,
    topology: Arc<Topology>,
    sampler: Mutex<Box<dyn Sampler>>,
    interval: Duration,
    rounds: AtomicU64,
    sends: AtomicU64,
    failures: AtomicU64,
    deferred: AtomicU64,
}

impl GossipEngine {
    pub fn new(seen: Arc<SeenLog>, topology: Arc<Topology>, config: &GossipConfig) -> Self {
        let sampler = RandomSampler::new(config.resend_probability, config.seed);
        Self::with_sampler(seen, topology, config.interval, Box::new(sampler))
    }

    /// Create an engine with a custom resend strategy
    pub fn with_sampler(
        seen: Arc<SeenLog>,
        topology: Arc<Topology>,
        interval: Duration,
        sampler: Box<dyn Sampler>,
    ) -> Self {
        Self {
            seen,
            topology,
            sampler: Mutex::new(sampler),
            interval,
            rounds: AtomicU64::new(0),
            sends: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            deferred: AtomicU64::new(0),
        }
    }

    /// Compute this round's payload for every neighbor. Neighbors with
    /// nothing to receive are left out.
    pub fn plan_round(&self) -> Result<Vec<(NodeId, BTreeSet<MessageId>)>, GossipError> {
        let neighbors = self.topology.neighbors().ok_or(GossipError::NoTopology)?;
        let mut sampler = self.sampler.lock();

        Ok(neighbors
            .iter()
            .filter_map(|peer| {
                let msgs = self.seen.outbound_for(peer, &mut **sampler);
                (!msgs.is_empty()).then(|| (peer.clone(), msgs))
            })
            .collect())
    }

    /// Run one round through `node`. A failed send is logged and does not
    /// stop sends to the remaining neighbors. Returns the number of sends.
    pub fn tick(&self, node: &Node) -> Result<usize, GossipError> {
        if !node.is_ready() {
            self.deferred.fetch_add(1, Ordering::Relaxed);
            return Err(GossipError::NotReady);
        }
        let plan = match self.plan_round() {
            Ok(plan) => plan,
            Err(e) => {
                self.deferred.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };
        self.rounds.fetch_add(1, Ordering::Relaxed);

        let mut sent = 0;
        for (peer, msgs) in plan {
            let count = msgs.len();
            match node.send(&peer, Payload::Gossip { msgs }) {
                Ok(()) => {
                    sent += 1;
                    debug!("Gossiped {} ids to {}", count, peer);
                }
                Err(e) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Gossip to {} failed: {}", peer, e);
                }
            }
        }
        self.sends.fetch_add(sent as u64, Ordering::Relaxed);
        Ok(sent)
    }

    /// Spawn the round timer. Rounds stop as soon as shutdown fires.
    pub fn spawn(
        self: &Arc<Self>,
        node: Arc<Node>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let engine = self.clone();

        tokio::spawn(async move {
            let mut ticker = interval(engine.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = engine.tick(&node) {
                            debug!("Deferring gossip round: {}", e);
                        }
                    }
                    _ = shutdown.recv() => {
                        debug!("Gossip engine stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Get gossip statistics
    pub fn stats(&self) -> GossipStats {
        GossipStats {
            rounds: self.rounds.load(Ordering::Relaxed),
            sends: self.sends.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
        }
    }
}

/// Gossip statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GossipStats {
    pub rounds: u64,
    pub sends: u64,
    pub failures: u64,
    pub deferred: u64,
}
