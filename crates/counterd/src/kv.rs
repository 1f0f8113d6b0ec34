//! Linearizable key-value clients
//!
//! The counter relies on exactly two primitives: a read and an atomic
//! compare-and-swap. [`RemoteKv`] talks to a KV service node over the wire;
//! [`SledKv`] uses an embedded sled tree, whose `compare_and_swap` gives the
//! same guarantee within one process.

use async_trait::async_trait;
use rumor_core::error::ErrorCode;
use rumor_core::types::{NodeId, Payload};
use rumor_net::{Node, NodeError};
use sled::Db;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// KV errors
#[derive(Debug, Error)]
pub enum KvError {
    #[error("Key does not exist: {0}")]
    NotFound(String),
    #[error("Compare-and-swap conflict on {0}")]
    Conflict(String),
    #[error("Store timed out")]
    Timeout,
    #[error("Store unavailable: {0}")]
    Transport(String),
    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("Corrupt value under {0}")]
    Corrupt(String),
}

impl From<NodeError> for KvError {
    fn from(err: NodeError) -> Self {
        match err {
            NodeError::Timeout { .. } => Self::Timeout,
            other => Self::Transport(other.to_string()),
        }
    }
}

/// A linearizable integer store
#[async_trait]
pub trait KvClient: Send + Sync {
    /// Current value of `key`
    async fn read(&self, key: &str) -> Result<i64, KvError>;

    /// Atomically replace `expected` with `proposed`. A missing key is
    /// created with `proposed` when `create_if_missing` is set.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: i64,
        proposed: i64,
        create_if_missing: bool,
    ) -> Result<(), KvError>;
}

/// Client for a KV service node (`seq-kv`, `lin-kv`)
pub struct RemoteKv {
    node: Arc<Node>,
    service: NodeId,
    timeout: Duration,
}

impl RemoteKv {
    pub fn new(node: Arc<Node>, service: NodeId, timeout: Duration) -> Self {
        Self {
            node,
            service,
            timeout,
        }
    }

    fn error(key: &str, code: ErrorCode, text: String) -> KvError {
        match code {
            ErrorCode::KeyDoesNotExist => KvError::NotFound(key.to_string()),
            ErrorCode::PreconditionFailed => KvError::Conflict(key.to_string()),
            ErrorCode::Timeout => KvError::Timeout,
            other => KvError::Transport(format!("{other:?}: {text}")),
        }
    }
}

#[async_trait]
impl KvClient for RemoteKv {
    async fn read(&self, key: &str) -> Result<i64, KvError> {
        let request = Payload::Read {
            key: Some(key.to_string()),
        };
        let reply = self.node.rpc(&self.service, request, self.timeout).await?;

        match reply.payload {
            Payload::ReadOk {
                value: Some(value), ..
            } => Ok(value),
            Payload::Error { code, text } => Err(Self::error(key, code, text)),
            other => Err(KvError::Transport(format!(
                "unexpected {} reply to read",
                other.kind()
            ))),
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: i64,
        proposed: i64,
        create_if_missing: bool,
    ) -> Result<(), KvError> {
        let request = Payload::Cas {
            key: key.to_string(),
            from: expected,
            to: proposed,
            create_if_not_exists: create_if_missing,
        };
        let reply = self.node.rpc(&self.service, request, self.timeout).await?;

        match reply.payload {
            Payload::CasOk => Ok(()),
            Payload::Error { code, text } => Err(Self::error(key, code, text)),
            other => Err(KvError::Transport(format!(
                "unexpected {} reply to cas",
                other.kind()
            ))),
        }
    }
}

/// Embedded store backed by a sled tree. Values are big-endian i64.
pub struct SledKv {
    db: Db,
    values: sled::Tree,
}

impl SledKv {
    /// Open storage at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
        Self::from_db(sled::open(path)?)
    }

    /// Open a throwaway store that is removed on drop
    pub fn temporary() -> Result<Self, KvError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, KvError> {
        let values = db.open_tree("values")?;
        Ok(Self { db, values })
    }

    fn decode(key: &str, bytes: &[u8]) -> Result<i64, KvError> {
        let bytes: [u8; 8] = bytes
            .try_into()
            .map_err(|_| KvError::Corrupt(key.to_string()))?;
        Ok(i64::from_be_bytes(bytes))
    }

    /// Flush all pending writes
    pub fn flush(&self) -> Result<(), KvError> {
        self.db.flush()?;
        Ok(())
    }
}

#[async_trait]
impl KvClient for SledKv {
    async fn read(&self, key: &str) -> Result<i64, KvError> {
        match self.values.get(key)? {
            Some(bytes) => Self::decode(key, &bytes),
            None => Err(KvError::NotFound(key.to_string())),
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: i64,
        proposed: i64,
        create_if_missing: bool,
    ) -> Result<(), KvError> {
        let new = proposed.to_be_bytes().to_vec();
        let result = match self.values.get(key)? {
            Some(_) => self
                .values
                .compare_and_swap(key, Some(&expected.to_be_bytes()[..]), Some(new))?,
            None if create_if_missing => {
                self.values.compare_and_swap(key, None::<&[u8]>, Some(new))?
            }
            None => return Err(KvError::NotFound(key.to_string())),
        };
        result.map_err(|_| KvError::Conflict(key.to_string()))
    }
}
