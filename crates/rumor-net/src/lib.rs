//! Networking primitives for rumor nodes
//!
//! This crate provides:
//! - Newline-delimited JSON framing
//! - Fire-and-forget transports (stdio and in-memory)
//! - The node runtime: identity, request/reply correlation and dispatch

pub mod framing;
pub mod node;
pub mod transport;

pub use framing::{EnvelopeCodec, FrameError, RawEnvelope};
pub use node::{Handler, Node, NodeError};
pub use transport::{MemoryNetwork, StdioTransport, Transport, TransportError};
