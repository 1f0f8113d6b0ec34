//! gossipd - gossip broadcast node
//!
//! This daemon provides:
//! - Idempotent ingestion of broadcast values
//! - Per-neighbor acknowledgement tracking
//! - Periodic gossip with random anti-entropy resends
//! - One-time topology assignment

pub mod config;
pub mod gossip;
pub mod handler;
pub mod seen;
pub mod server;
pub mod topology;

pub use config::Config;
pub use gossip::{GossipConfig, GossipEngine, RandomSampler};
pub use handler::BroadcastHandler;
pub use seen::{Sampler, SeenLog};
pub use server::{BroadcastServer, Server};
pub use topology::Topology;
