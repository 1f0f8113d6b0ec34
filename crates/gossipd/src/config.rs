//! Configuration for gossipd

use crate::gossip::GossipConfig;
use clap::Parser;
use std::time::Duration;

/// gossipd - gossip broadcast node
#[derive(Parser, Debug, Clone)]
#[command(name = "gossipd")]
#[command(about = "Gossip broadcast node with anti-entropy resends")]
pub struct Config {
    /// Milliseconds between gossip rounds
    #[arg(long, env = "GOSSIP_INTERVAL_MS", default_value = "200")]
    pub gossip_interval_ms: u64,

    /// Chance that an already-acknowledged id is resent in a round
    #[arg(long, env = "GOSSIP_RESEND_PROBABILITY", default_value = "0.3")]
    pub resend_probability: f64,

    /// Seed for the resend sampler (random when unset)
    #[arg(long, env = "GOSSIP_SEED")]
    pub seed: Option<u64>,

    /// Outbound queue capacity
    #[arg(long, default_value = "1024")]
    pub outbox_capacity: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty", value_parser = ["json", "pretty"])]
    pub log_format: String,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.gossip_interval_ms == 0 {
            anyhow::bail!("Gossip interval must be positive");
        }
        if !(0.0..=1.0).contains(&self.resend_probability) {
            anyhow::bail!(
                "Resend probability must be within [0, 1], got {}",
                self.resend_probability
            );
        }
        if self.outbox_capacity == 0 {
            anyhow::bail!("Outbox capacity must be positive");
        }
        Ok(())
    }

    /// Gossip engine settings
    pub fn gossip(&self) -> GossipConfig {
        GossipConfig {
            interval: Duration::from_millis(self.gossip_interval_ms),
            resend_probability: self.resend_probability,
            seed: self.seed,
        }
    }
}
