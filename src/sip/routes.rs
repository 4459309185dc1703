//! The forwarding table.

use std::fmt;

use fxhash::FxHashMap;

use snet_types::NodeId;

use crate::topology::Topology;

/// Maps destination node ids to the neighbor packets are handed to next.
/// Seeded with the direct-neighbor identity mapping; rewritten whenever
/// relaxation finds a cheaper path. Destinations still at infinite cost
/// have no entry.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    next_hop: FxHashMap<NodeId, NodeId>,
}

impl RoutingTable {
    pub fn new(topo: &Topology) -> Self {
        let next_hop = topo.neighbors().into_iter().map(|n| (n, n)).collect();
        Self { next_hop }
    }

    pub fn next_hop(&self, dest: NodeId) -> Option<NodeId> {
        self.next_hop.get(&dest).copied()
    }

    pub fn set_next_hop(&mut self, dest: NodeId, via: NodeId) {
        self.next_hop.insert(dest, via);
    }
}

impl fmt::Display for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "routes:")?;
        let mut entries: Vec<_> = self.next_hop.iter().collect();
        entries.sort();
        for (dest, via) in entries {
            write!(f, " [{dest} via {via}]")?;
        }
        Ok(())
    }
}
