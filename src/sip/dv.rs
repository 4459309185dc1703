//! The distance-vector table and Bellman-Ford relaxation.

use std::fmt;

use fxhash::FxHashMap;

use snet_types::{NodeId, RouteEntry, RouteUpdate, INFINITE_COST};

use crate::topology::Topology;

use super::{nbrcost::NbrCostTable, routes::RoutingTable};

/// Path-cost addition with [`INFINITE_COST`] as an absorbing value: no sum
/// of finite link costs may fold an unreachable path into a reachable one.
pub(crate) fn cost_add(a: u32, b: u32) -> u32 {
    if a >= INFINITE_COST || b >= INFINITE_COST {
        INFINITE_COST
    } else {
        (a + b).min(INFINITE_COST)
    }
}

/// Rows for the local node and each direct neighbor, columns for every node
/// in the overlay. Seeded from the topology, rewritten by arriving route
/// updates and by relaxation.
#[derive(Debug, Clone)]
pub struct DvTable {
    self_node: NodeId,
    nodes: Vec<NodeId>,
    neighbors: Vec<NodeId>,
    rows: FxHashMap<NodeId, FxHashMap<NodeId, u32>>,
}

impl DvTable {
    pub fn new(topo: &Topology, nct: &NbrCostTable) -> Self {
        let self_node = topo.my_node();
        let nodes = topo.nodes().to_vec();
        let neighbors = topo.neighbors();

        let mut rows = FxHashMap::default();
        for &row in neighbors.iter().chain(std::iter::once(&self_node)) {
            let cells = nodes
                .iter()
                .map(|&dest| {
                    let cost = if row == dest {
                        0
                    } else if row == self_node {
                        nct.cost(dest)
                    } else {
                        topo.cost(row, dest)
                    };
                    (dest, cost)
                })
                .collect();
            rows.insert(row, cells);
        }

        Self {
            self_node,
            nodes,
            neighbors,
            rows,
        }
    }

    /// Known cost from `from` to `to`; [`INFINITE_COST`] when either the row
    /// or the destination is unknown.
    pub fn cost(&self, from: NodeId, to: NodeId) -> u32 {
        self.rows
            .get(&from)
            .and_then(|row| row.get(&to))
            .copied()
            .unwrap_or(INFINITE_COST)
    }

    /// Writes one cell. Unknown rows and unknown destinations are ignored:
    /// updates only ever refine the tracked (self + neighbor) × node grid.
    pub fn set_cost(&mut self, from: NodeId, to: NodeId, cost: u32) {
        if let Some(row) = self.rows.get_mut(&from) {
            if let Some(cell) = row.get_mut(&to) {
                *cell = cost;
            }
        }
    }

    /// Snapshot of the local row as a broadcastable distance vector.
    pub fn self_vector(&self) -> RouteUpdate {
        RouteUpdate {
            entries: self
                .nodes
                .iter()
                .map(|&node| RouteEntry {
                    node,
                    cost: self.cost(self.self_node, node),
                })
                .collect(),
        }
    }

    /// Ingests a neighbor's distance vector and relaxes the local row,
    /// rewriting forwarding next-hops for every destination whose cost
    /// improves. The caller holds the DV lock and passes the forwarding
    /// table through so that lock's scope encloses the forwarding updates.
    pub fn apply_update(&mut self, from: NodeId, update: &RouteUpdate, routes: &mut RoutingTable) {
        for entry in &update.entries {
            self.set_cost(from, entry.node, entry.cost);
        }

        for i in 0..self.nodes.len() {
            let y = self.nodes[i];
            for j in 0..self.neighbors.len() {
                let v = self.neighbors[j];
                let via = cost_add(self.cost(self.self_node, v), self.cost(v, y));
                if via < self.cost(self.self_node, y) {
                    tracing::debug!(
                        target: "snet/sip",
                        "relaxed route to {y}: cost {via} via {v}",
                    );
                    self.set_cost(self.self_node, y, via);
                    routes.set_next_hop(y, v);
                }
            }
        }
    }
}

impl fmt::Display for DvTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "distance vectors:")?;
        let mut row_ids: Vec<_> = self.rows.keys().copied().collect();
        row_ids.sort_unstable();
        for row in row_ids {
            write!(f, "  from {row}:")?;
            for &dest in &self.nodes {
                let cost = self.cost(row, dest);
                if cost >= INFINITE_COST {
                    write!(f, " [{dest} @ inf]")?;
                } else {
                    write!(f, " [{dest} @ {cost}]")?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear(me: NodeId) -> (Topology, NbrCostTable) {
        let topo = Topology::parse(
            "netlab_1 netlab_2 1\nnetlab_2 netlab_3 1\nnetlab_3 netlab_4 1\n",
            me,
        )
        .unwrap();
        let nct = NbrCostTable::new(&topo);
        (topo, nct)
    }

    #[test]
    fn absorbing_cost_arithmetic() {
        assert_eq!(cost_add(1, 2), 3);
        assert_eq!(cost_add(INFINITE_COST, 1), INFINITE_COST);
        assert_eq!(cost_add(1, INFINITE_COST), INFINITE_COST);
        assert_eq!(cost_add(998, 998), INFINITE_COST);
        assert_eq!(cost_add(u32::MAX, 1), INFINITE_COST);
    }

    #[test]
    fn seeded_from_topology() {
        let (topo, nct) = linear(2);
        let dv = DvTable::new(&topo, &nct);
        assert_eq!(dv.cost(2, 2), 0);
        assert_eq!(dv.cost(2, 1), 1);
        assert_eq!(dv.cost(2, 3), 1);
        assert_eq!(dv.cost(2, 4), INFINITE_COST);
        // Neighbor rows carry their own direct links.
        assert_eq!(dv.cost(3, 4), 1);
        // Non-neighbor rows do not exist.
        assert_eq!(dv.cost(4, 4), INFINITE_COST);
    }

    #[test]
    fn update_relaxes_and_rewrites_next_hop() {
        let (topo, nct) = linear(2);
        let mut dv = DvTable::new(&topo, &nct);
        let mut routes = RoutingTable::new(&topo);

        // Neighbor 3 advertises that it reaches node 4 at cost 1.
        let update = RouteUpdate {
            entries: vec![
                RouteEntry { node: 3, cost: 0 },
                RouteEntry { node: 4, cost: 1 },
            ],
        };
        dv.apply_update(3, &update, &mut routes);

        assert_eq!(dv.cost(2, 4), 2);
        assert_eq!(routes.next_hop(4), Some(3));
    }

    #[test]
    fn update_from_unknown_row_is_ignored() {
        let (topo, nct) = linear(2);
        let mut dv = DvTable::new(&topo, &nct);
        let mut routes = RoutingTable::new(&topo);

        // Node 4 is not a neighbor of 2; its vector carries no row here.
        let update = RouteUpdate {
            entries: vec![RouteEntry { node: 1, cost: 1 }],
        };
        dv.apply_update(4, &update, &mut routes);
        assert_eq!(dv.cost(4, 1), INFINITE_COST);
        assert_eq!(dv.cost(2, 1), 1);
    }

    #[test]
    fn self_vector_snapshots_local_row() {
        let (topo, nct) = linear(1);
        let dv = DvTable::new(&topo, &nct);
        let vector = dv.self_vector();
        assert_eq!(
            vector.entries,
            vec![
                RouteEntry { node: 1, cost: 0 },
                RouteEntry { node: 2, cost: 1 },
                RouteEntry {
                    node: 3,
                    cost: INFINITE_COST
                },
                RouteEntry {
                    node: 4,
                    cost: INFINITE_COST
                },
            ]
        );
    }
}
