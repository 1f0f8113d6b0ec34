//! Grow-only counter over a compare-and-swap store
//!
//! The counter lives under a single key. `add` is an optimistic retry loop:
//! read the current value, propose `current + delta`, and retry from a fresh
//! read whenever another writer got there first. Serialization across the
//! whole cluster comes from the store's CAS, not from any local lock.

use crate::kv::{KvClient, KvError};
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Counter errors
#[derive(Debug, Error)]
pub enum CounterError {
    #[error("Store error: {0}")]
    Store(#[from] KvError),
    #[error("Negative delta {0}: counter only grows")]
    NegativeDelta(i64),
    #[error("Counter overflow adding {delta} to {current}")]
    Overflow { current: i64, delta: i64 },
}

/// Pacing for CAS retries. Conflicts are always retried; the policy only
/// spaces attempts out and decides when to complain.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Upper bound of the first retry delay
    pub backoff_base: Duration,
    /// Cap on any retry delay
    pub backoff_max: Duration,
    /// Log a warning every this many conflicting attempts (0 = never)
    pub warn_after: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_millis(2),
            backoff_max: Duration::from_millis(100),
            warn_after: 32,
        }
    }
}

impl RetryPolicy {
    /// Retry immediately after every conflict
    pub fn immediate() -> Self {
        Self {
            backoff_base: Duration::ZERO,
            backoff_max: Duration::ZERO,
            warn_after: 32,
        }
    }

    /// Jittered exponential schedule between conflicting attempts. It never
    /// runs out; only a non-conflict error ends the loop.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.backoff_base)
            .with_max_interval(self.backoff_max)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Grow-only counter stored under one key
pub struct GrowCounter {
    kv: Arc<dyn KvClient>,
    key: String,
    /// Bound on every individual store call
    io_timeout: Duration,
    policy: RetryPolicy,
    applied: AtomicU64,
    conflicts: AtomicU64,
}

impl GrowCounter {
    pub fn new(
        kv: Arc<dyn KvClient>,
        key: impl Into<String>,
        io_timeout: Duration,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            kv,
            key: key.into(),
            io_timeout,
            policy,
            applied: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    async fn timed<T>(
        &self,
        op: impl Future<Output = Result<T, KvError>>,
    ) -> Result<T, KvError> {
        tokio::time::timeout(self.io_timeout, op)
            .await
            .map_err(|_| KvError::Timeout)?
    }

    /// Best-effort creation of the key at zero. Failure is expected when
    /// the key already exists or another node raced us to it.
    pub async fn init(&self) -> bool {
        match self
            .timed(self.kv.compare_and_swap(&self.key, 0, 0, true))
            .await
        {
            Ok(()) => {
                debug!("Initialized {} at 0", self.key);
                true
            }
            Err(e) => {
                debug!("Skipped initializing {}: {}", self.key, e);
                false
            }
        }
    }

    /// Current stored value; a key that was never written counts as zero
    async fn current(&self) -> Result<i64, KvError> {
        match self.timed(self.kv.read(&self.key)).await {
            Ok(value) => Ok(value),
            Err(KvError::NotFound(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Read the counter straight from the store
    pub async fn read(&self) -> Result<i64, CounterError> {
        Ok(self.current().await?)
    }

    /// Add `delta`, retrying on CAS conflicts until the write lands. Store
    /// read failures and non-conflict CAS failures are returned as-is.
    pub async fn add(&self, delta: i64) -> Result<(), CounterError> {
        if delta < 0 {
            return Err(CounterError::NegativeDelta(delta));
        }
        if delta == 0 {
            return Ok(());
        }

        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        backoff::future::retry(self.policy.backoff(), move || async move {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            self.try_add(delta, attempt).await
        })
        .await
    }

    /// One read-then-CAS attempt. Only a conflict is worth retrying.
    async fn try_add(
        &self,
        delta: i64,
        attempt: u32,
    ) -> Result<(), backoff::Error<CounterError>> {
        let current = self
            .current()
            .await
            .map_err(|e| backoff::Error::permanent(CounterError::from(e)))?;
        let target = current
            .checked_add(delta)
            .ok_or(backoff::Error::permanent(CounterError::Overflow { current, delta }))?;

        match self
            .timed(self.kv.compare_and_swap(&self.key, current, target, true))
            .await
        {
            Ok(()) => {
                self.applied.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Added {} to {}: {} -> {} after {} attempt(s)",
                    delta, self.key, current, target, attempt
                );
                Ok(())
            }
            Err(e @ KvError::Conflict(_)) => {
                self.conflicts.fetch_add(1, Ordering::Relaxed);
                if self.policy.warn_after > 0 && attempt % self.policy.warn_after == 0 {
                    warn!(
                        "{} conflicting attempts adding {} to {}",
                        attempt, delta, self.key
                    );
                }
                Err(backoff::Error::transient(CounterError::from(e)))
            }
            Err(e) => Err(backoff::Error::permanent(CounterError::from(e))),
        }
    }

    /// Get counter statistics
    pub fn stats(&self) -> CounterStats {
        CounterStats {
            applied: self.applied.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
        }
    }
}

/// Counter statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterStats {
    /// Adds that landed in the store
    pub applied: u64,
    /// CAS attempts lost to other writers
    pub conflicts: u64,
}
