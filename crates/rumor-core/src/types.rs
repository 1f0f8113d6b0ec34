//! Wire types for the rumor node protocol
//!
//! Every message is an [`Envelope`] carrying a [`Body`]. The body holds the
//! request/reply correlation ids and a [`Payload`] tagged by its `type` field.
//! Field names match the JSON line protocol exactly.

use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

// =============================================================================
// IDENTITY TYPES (newtypes for type safety)
// =============================================================================

/// Node or client identifier (`n1`, `c4`, `seq-kv`, ...)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identifier of one broadcast payload. Supplied by clients, never generated here.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Per-node topology assignment: node -> neighbors
pub type TopologyMap = HashMap<NodeId, Vec<NodeId>>;

// =============================================================================
// ENVELOPE
// =============================================================================

/// A routed message. `B` is [`Body`] once decoded; the inbound path first
/// decodes with `serde_json::Value` so a malformed body can still be answered.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Envelope<B = Body> {
    pub src: NodeId,
    pub dest: NodeId,
    pub body: B,
}

impl<B> Envelope<B> {
    pub fn new(src: NodeId, dest: NodeId, body: B) -> Self {
        Self { src, dest, body }
    }
}

impl Envelope<Body> {
    /// Message type name, for logging
    pub fn kind(&self) -> &'static str {
        self.body.payload.kind()
    }
}

/// Message body: correlation ids plus the typed payload
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Body {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Body {
    /// A body that expects no reply
    pub fn oneway(payload: Payload) -> Self {
        Self {
            msg_id: None,
            in_reply_to: None,
            payload,
        }
    }

    /// A request body expecting a reply correlated by `msg_id`
    pub fn request(msg_id: u64, payload: Payload) -> Self {
        Self {
            msg_id: Some(msg_id),
            in_reply_to: None,
            payload,
        }
    }

    /// A reply to the request carrying `in_reply_to`
    pub fn reply(in_reply_to: u64, payload: Payload) -> Self {
        Self {
            msg_id: None,
            in_reply_to: Some(in_reply_to),
            payload,
        }
    }
}

// =============================================================================
// PAYLOADS
// =============================================================================

/// All message types understood by rumor nodes, tagged by `type`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    // Node bootstrap
    Init {
        node_id: NodeId,
        node_ids: Vec<NodeId>,
    },
    InitOk,
    Echo {
        echo: serde_json::Value,
    },
    EchoOk {
        echo: serde_json::Value,
    },
    Generate,
    GenerateOk {
        id: String,
    },

    // Broadcast
    Broadcast {
        message: MessageId,
    },
    BroadcastOk,
    Topology {
        topology: TopologyMap,
    },
    TopologyOk,
    /// Peer-to-peer dissemination; no reply expected
    Gossip {
        msgs: BTreeSet<MessageId>,
    },

    // Counter
    Add {
        delta: i64,
    },
    AddOk,

    /// Shared by the broadcast read, the counter read and the KV read.
    /// Only the KV form carries a key.
    Read {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    /// Broadcast replies carry `messages`, counter and KV replies carry `value`
    ReadOk {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        messages: Option<BTreeSet<MessageId>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<i64>,
    },
    Cas {
        key: String,
        from: i64,
        to: i64,
        #[serde(default)]
        create_if_not_exists: bool,
    },
    CasOk,

    Error {
        code: ErrorCode,
        #[serde(default)]
        text: String,
    },
}

impl Payload {
    /// Wire name of the payload type
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::InitOk => "init_ok",
            Self::Echo { .. } => "echo",
            Self::EchoOk { .. } => "echo_ok",
            Self::Generate => "generate",
            Self::GenerateOk { .. } => "generate_ok",
            Self::Broadcast { .. } => "broadcast",
            Self::BroadcastOk => "broadcast_ok",
            Self::Topology { .. } => "topology",
            Self::TopologyOk => "topology_ok",
            Self::Gossip { .. } => "gossip",
            Self::Add { .. } => "add",
            Self::AddOk => "add_ok",
            Self::Read { .. } => "read",
            Self::ReadOk { .. } => "read_ok",
            Self::Cas { .. } => "cas",
            Self::CasOk => "cas_ok",
            Self::Error { .. } => "error",
        }
    }

    /// Broadcast read reply
    pub fn messages(messages: BTreeSet<MessageId>) -> Self {
        Self::ReadOk {
            messages: Some(messages),
            value: None,
        }
    }

    /// Counter or KV read reply
    pub fn value(value: i64) -> Self {
        Self::ReadOk {
            messages: None,
            value: Some(value),
        }
    }
}
