//! counterd - grow-only counter node
//!
//! This daemon provides:
//! - A single counter key updated by a compare-and-swap retry loop
//! - A remote KV client speaking the node protocol, or an embedded sled store
//! - Per-call store timeouts and jittered backoff between conflicts

pub mod config;
pub mod counter;
pub mod kv;
pub mod server;

pub use config::{Backend, Config};
pub use counter::{CounterError, GrowCounter, RetryPolicy};
pub use kv::{KvClient, KvError, RemoteKv, SledKv};
pub use server::{CounterServer, Server};
