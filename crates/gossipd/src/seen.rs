//! Seen set and per-peer acknowledgement table
//!
//! Both live in one aggregate behind a single reader/writer lock. The seen
//! set is a grow-only set: ids are inserted at most once and never removed.
//! Acknowledgement entries are lower bounds on what a neighbor holds and
//! likewise only grow.

use parking_lot::RwLock;
use rumor_core::types::{MessageId, NodeId};
use std::collections::{BTreeSet, HashMap};

/// Decides whether an already-acknowledged id is resent this round
pub trait Sampler: Send {
    fn resend(&mut self, id: MessageId) -> bool;
}

#[derive(Debug, Default)]
struct Inner {
    /// Every id this node has observed
    seen: BTreeSet<MessageId>,
    /// Neighbor -> ids that neighbor is known to hold
    acks: HashMap<NodeId, BTreeSet<MessageId>>,
}

/// Local broadcast state
#[derive(Debug, Default)]
pub struct SeenLog {
    inner: RwLock<Inner>,
}

impl SeenLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an id. Returns true if it was new.
    pub fn insert(&self, id: MessageId) -> bool {
        self.inner.write().seen.insert(id)
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.inner.read().seen.contains(&id)
    }

    /// Point-in-time copy of the seen set
    pub fn snapshot(&self) -> BTreeSet<MessageId> {
        self.inner.read().seen.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().seen.is_empty()
    }

    /// Insert ids without crediting anyone with holding them. Returns how
    /// many were new.
    pub fn extend(&self, ids: &BTreeSet<MessageId>) -> usize {
        let mut inner = self.inner.write();
        ids.iter().filter(|id| inner.seen.insert(**id)).count()
    }

    /// Merge ids received from `peer`: each is inserted locally and recorded
    /// as held by the sender. Returns how many ids were new to this node.
    pub fn merge(&self, peer: &NodeId, ids: &BTreeSet<MessageId>) -> usize {
        let mut inner = self.inner.write();
        let mut added = 0;
        for id in ids {
            if inner.seen.insert(*id) {
                added += 1;
            }
        }
        inner
            .acks
            .entry(peer.clone())
            .or_default()
            .extend(ids.iter().copied());
        added
    }

    /// Ids `peer` is known to hold. Unknown peers have acknowledged nothing.
    pub fn acked_by(&self, peer: &NodeId) -> BTreeSet<MessageId> {
        self.inner
            .read()
            .acks
            .get(peer)
            .cloned()
            .unwrap_or_default()
    }

    /// Ids to send `peer` this round: everything it has not acknowledged,
    /// plus the already-acknowledged ids the sampler picks for resending.
    pub fn outbound_for(&self, peer: &NodeId, sampler: &mut dyn Sampler) -> BTreeSet<MessageId> {
        let inner = self.inner.read();
        let acked = inner.acks.get(peer);
        inner
            .seen
            .iter()
            .copied()
            .filter(|id| match acked {
                Some(acked) if acked.contains(id) => sampler.resend(*id),
                _ => true,
            })
            .collect()
    }

    /// Get seen-state statistics
    pub fn stats(&self) -> SeenStats {
        let inner = self.inner.read();
        SeenStats {
            seen: inner.seen.len(),
            peers_tracked: inner.acks.len(),
            acks: inner.acks.values().map(BTreeSet::len).sum(),
        }
    }
}

/// Seen-state statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenStats {
    pub seen: usize,
    pub peers_tracked: usize,
    pub acks: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(bool);

    impl Sampler for Fixed {
        fn resend(&mut self, _id: MessageId) -> bool {
            self.0
        }
    }

    fn ids(values: &[i64]) -> BTreeSet<MessageId> {
        values.iter().copied().map(MessageId).collect()
    }

    #[test]
    fn test_idempotent_insert() {
        let log = SeenLog::new();

        assert!(log.insert(MessageId(5)));
        for _ in 0..10 {
            assert!(!log.insert(MessageId(5)));
        }
        assert_eq!(log.snapshot(), ids(&[5]));

        assert_eq!(log.merge(&"n2".into(), &ids(&[5, 6])), 1);
        assert_eq!(log.merge(&"n3".into(), &ids(&[5, 6])), 0);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_merge_records_acks() {
        let log = SeenLog::new();
        let peer = NodeId::from("n2");

        assert!(log.acked_by(&peer).is_empty());
        log.merge(&peer, &ids(&[1, 2]));
        log.merge(&peer, &ids(&[3]));

        assert_eq!(log.acked_by(&peer), ids(&[1, 2, 3]));
        assert_eq!(
            log.stats(),
            SeenStats {
                seen: 3,
                peers_tracked: 1,
                acks: 3
            }
        );
    }

    #[test]
    fn test_outbound_unknown_peer_gets_everything() {
        let log = SeenLog::new();
        log.insert(MessageId(1));
        log.insert(MessageId(2));

        let out = log.outbound_for(&"n9".into(), &mut Fixed(false));
        assert_eq!(out, ids(&[1, 2]));
    }

    #[test]
    fn test_outbound_skips_acked_unless_sampled() {
        let log = SeenLog::new();
        let peer = NodeId::from("n2");
        log.insert(MessageId(1));
        log.merge(&peer, &ids(&[2, 3]));

        assert_eq!(log.outbound_for(&peer, &mut Fixed(false)), ids(&[1]));
        assert_eq!(log.outbound_for(&peer, &mut Fixed(true)), ids(&[1, 2, 3]));
    }

    #[test]
    fn test_extend_records_no_acks() {
        let log = SeenLog::new();
        assert_eq!(log.extend(&ids(&[1, 2])), 2);
        assert_eq!(log.extend(&ids(&[2, 3])), 1);
        assert_eq!(log.snapshot(), ids(&[1, 2, 3]));
        assert_eq!(log.stats().peers_tracked, 0);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let log = SeenLog::new();
        log.insert(MessageId(1));
        let snapshot = log.snapshot();
        log.insert(MessageId(2));
        assert_eq!(snapshot, ids(&[1]));
    }
}
