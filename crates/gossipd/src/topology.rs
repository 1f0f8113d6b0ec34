//! Neighbor list, assigned once by the `topology` message

use rumor_core::types::{NodeId, TopologyMap};
use std::sync::OnceLock;
use tracing::{info, warn};

/// This node's fixed neighbor list. Written once, read lock-free after.
#[derive(Debug, Default)]
pub struct Topology {
    neighbors: OnceLock<Vec<NodeId>>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an already-assigned topology
    pub fn with_neighbors(neighbors: Vec<NodeId>) -> Self {
        let topology = Self::new();
        let _ = topology.neighbors.set(neighbors);
        topology
    }

    /// Take `self_id`'s entry from the cluster map. Returns false if a
    /// topology was already assigned; repeated assignments are ignored.
    pub fn assign(&self, self_id: &NodeId, map: &TopologyMap) -> bool {
        if self.neighbors.get().is_some() {
            return false;
        }

        let neighbors: Vec<NodeId> = match map.get(self_id) {
            Some(neighbors) => neighbors
                .iter()
                .filter(|neighbor| *neighbor != self_id)
                .cloned()
                .collect(),
            None => {
                warn!("Topology has no entry for {}; no neighbors", self_id);
                Vec::new()
            }
        };

        let count = neighbors.len();
        let assigned = self.neighbors.set(neighbors).is_ok();
        if assigned {
            info!("Assigned {} neighbors", count);
        }
        assigned
    }

    /// Neighbors, or None before assignment
    pub fn neighbors(&self) -> Option<&[NodeId]> {
        self.neighbors.get().map(Vec::as_slice)
    }

    /// Whether `id` is one of our assigned neighbors
    pub fn is_neighbor(&self, id: &NodeId) -> bool {
        self.neighbors().is_some_and(|neighbors| neighbors.contains(id))
    }

    pub fn is_assigned(&self) -> bool {
        self.neighbors.get().is_some()
    }
}
