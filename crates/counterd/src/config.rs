//! Configuration for counterd

use crate::counter::RetryPolicy;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Where the counter value lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// A KV service node reached over the wire
    Remote,
    /// An embedded sled database (single process only)
    Sled,
}

/// counterd - grow-only counter node
#[derive(Parser, Debug, Clone)]
#[command(name = "counterd")]
#[command(about = "Grow-only counter over a compare-and-swap store")]
pub struct Config {
    /// Key holding the counter
    #[arg(long, env = "COUNTER_KEY", default_value = "counter")]
    pub key: String,

    /// Store backend
    #[arg(long, env = "COUNTER_BACKEND", value_enum, default_value = "remote")]
    pub backend: Backend,

    /// KV service node id for the remote backend
    #[arg(long, env = "COUNTER_KV_SERVICE", default_value = "seq-kv")]
    pub kv_service: String,

    /// Data directory for the sled backend (temporary when unset)
    #[arg(long, env = "COUNTER_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Timeout for each store call in milliseconds
    #[arg(long, env = "COUNTER_IO_TIMEOUT_MS", default_value = "1000")]
    pub io_timeout_ms: u64,

    /// Upper bound of the first retry delay after a CAS conflict
    #[arg(long, default_value = "2")]
    pub backoff_base_ms: u64,

    /// Cap on any retry delay
    #[arg(long, default_value = "100")]
    pub backoff_max_ms: u64,

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
        if self.key.is_empty() {
            anyhow::bail!("Counter key must not be empty");
        }
        if self.io_timeout_ms == 0 {
            anyhow::bail!("Store timeout must be positive");
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            anyhow::bail!(
                "Backoff base ({}ms) exceeds backoff max ({}ms)",
                self.backoff_base_ms,
                self.backoff_max_ms
            );
        }
        if self.backend == Backend::Remote && self.kv_service.is_empty() {
            anyhow::bail!("Remote backend needs a KV service id");
        }
        if self.outbox_capacity == 0 {
            anyhow::bail!("Outbox capacity must be positive");
        }
        Ok(())
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Retry pacing for CAS conflicts
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            ..RetryPolicy::default()
        }
    }
}
