//! The neighbor table.

use std::{
    io::{Error, ErrorKind, Result},
    net::Ipv4Addr,
};

use fxhash::FxHashMap;
use tokio::sync::mpsc::UnboundedSender;

use snet_types::{NodeId, SipPacket};

use crate::topology::{self, Topology};

struct Neighbor {
    addr: Ipv4Addr,
    tx: Option<UnboundedSender<SipPacket>>,
}

/// One entry per direct neighbor: its overlay address and, once the link is
/// up, the sender feeding that link's writer task.
pub struct NeighborTable {
    entries: FxHashMap<NodeId, Neighbor>,
}

impl NeighborTable {
    /// Builds the table from the parsed topology; every neighbor must
    /// appear in the compiled-in host table.
    pub fn new(topo: &Topology) -> Result<Self> {
        let mut entries = FxHashMap::default();
        for node in topo.neighbors() {
            let addr = topology::host_addr(node).ok_or_else(|| {
                Error::new(
                    ErrorKind::NotFound,
                    format!("neighbor {node} has no known address"),
                )
            })?;
            entries.insert(node, Neighbor { addr, tx: None });
        }
        Ok(Self { entries })
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<_> = self.entries.keys().copied().collect();
        nodes.sort_unstable();
        nodes
    }

    pub fn addr(&self, node: NodeId) -> Option<Ipv4Addr> {
        self.entries.get(&node).map(|n| n.addr)
    }

    /// Binds an established link's writer channel to its neighbor.
    pub fn attach(&mut self, node: NodeId, tx: UnboundedSender<SipPacket>) {
        if let Some(entry) = self.entries.get_mut(&node) {
            entry.tx = Some(tx);
        }
    }

    pub fn sender(&self, node: NodeId) -> Option<&UnboundedSender<SipPacket>> {
        self.entries.get(&node).and_then(|n| n.tx.as_ref())
    }

    /// All live links, for broadcast fan-out.
    pub fn senders(&self) -> impl Iterator<Item = (NodeId, &UnboundedSender<SipPacket>)> {
        self.entries
            .iter()
            .filter_map(|(&node, n)| n.tx.as_ref().map(|tx| (node, tx)))
    }
}
