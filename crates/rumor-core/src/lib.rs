//! rumor core library
//!
//! Wire types and error codes shared by the rumor nodes: the gossip
//! broadcast daemon and the grow-only counter daemon.
//!
//! # Modules
//!
//! - [`types`]: Envelope, body and payload types (NodeId, MessageId, ...)
//! - [`error`]: Decode errors, wire error codes and handler errors

pub mod error;
pub mod types;

#[cfg(test)]
mod test_vectors;

pub use error::{Error, ErrorCode, Result, RpcError};
pub use types::*;
