//! The neighbor-cost table.

use std::fmt;

use fxhash::FxHashMap;

use snet_types::{NodeId, INFINITE_COST};

use crate::topology::Topology;

/// Direct link costs to each neighbor. Built once from the topology and
/// never mutated during a run.
#[derive(Debug, Clone)]
pub struct NbrCostTable {
    costs: FxHashMap<NodeId, u32>,
}

impl NbrCostTable {
    pub fn new(topo: &Topology) -> Self {
        let me = topo.my_node();
        let costs = topo
            .neighbors()
            .into_iter()
            .map(|n| (n, topo.cost(me, n)))
            .collect();
        Self { costs }
    }

    /// Direct link cost to `node`, or [`INFINITE_COST`] for non-neighbors.
    pub fn cost(&self, node: NodeId) -> u32 {
        self.costs.get(&node).copied().unwrap_or(INFINITE_COST)
    }

    pub fn neighbors(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.costs.keys().copied()
    }
}

impl fmt::Display for NbrCostTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "neighbor costs:")?;
        let mut entries: Vec<_> = self.costs.iter().collect();
        entries.sort();
        for (node, cost) in entries {
            write!(f, " [{node} @ {cost}]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn costs_follow_topology() {
        let topo = Topology::parse(
            "netlab_1 netlab_2 3\nnetlab_2 netlab_3 5\nnetlab_1 netlab_3 9\n",
            2,
        )
        .unwrap();
        let nct = NbrCostTable::new(&topo);
        assert_eq!(nct.cost(1), 3);
        assert_eq!(nct.cost(3), 5);
        assert_eq!(nct.cost(2), INFINITE_COST);
        assert_eq!(nct.cost(4), INFINITE_COST);
    }
}
