//! Broadcast ingestion
//!
//! Ingestion only records ids; dissemination is left to the gossip engine.

use crate::seen::SeenLog;
use rumor_core::types::{MessageId, NodeId};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

pub struct BroadcastHandler {
    seen: Arc<SeenLog>,
}

impl BroadcastHandler {
    pub fn new(seen: Arc<SeenLog>) -> Self {
        Self { seen }
    }

    /// Record a broadcast value. Duplicates are no-ops.
    pub fn submit(&self, id: MessageId) -> bool {
        let fresh = self.seen.insert(id);
        if fresh {
            debug!("New message {}", id);
        }
        fresh
    }

    /// Snapshot of every id seen so far
    pub fn read_all(&self) -> BTreeSet<MessageId> {
        self.seen.snapshot()
    }

    /// Ingest a gossip payload. The sender evidently holds everything it
    /// sent, so those ids are recorded as acknowledged by it.
    pub fn on_gossip(&self, from: &NodeId, ids: &BTreeSet<MessageId>) -> usize {
        let added = self.seen.merge(from, ids);
        if added > 0 {
            debug!("Gossip from {}: {} of {} new", from, added, ids.len());
        }
        added
    }

    /// Ingest gossip from a node that is not our neighbor. Its ids are kept
    /// but it gets no acknowledgement entry, since we never gossip to it.
    pub fn on_stray_gossip(&self, from: &NodeId, ids: &BTreeSet<MessageId>) -> usize {
        let added = self.seen.extend(ids);
        debug!("Gossip from non-neighbor {}: {} of {} new", from, added, ids.len());
        added
    }
}
