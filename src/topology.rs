//! Overlay topology: the `topology.dat` parser and host identity helpers.
//!
//! The topology file names one overlay link per line, `hostA hostB cost`,
//! where hostnames follow the `netlab_<N>` scheme and `<N>` is the node id.
//! Host addresses come from a compiled-in table; self identity comes from
//! the `SNET_NODE` environment override or the OS hostname.

use std::{
    fs,
    io::{Error, ErrorKind, Result},
    net::Ipv4Addr,
    path::Path,
};

use fxhash::FxHashMap;

use snet_types::{NodeId, INFINITE_COST};

/// Compiled-in hostname→address table of the lab hosts.
const TOPO_HOSTS: &[(&str, Ipv4Addr)] = &[
    ("netlab_1", Ipv4Addr::new(192, 168, 163, 201)),
    ("netlab_2", Ipv4Addr::new(192, 168, 163, 202)),
    ("netlab_3", Ipv4Addr::new(192, 168, 163, 203)),
    ("netlab_4", Ipv4Addr::new(192, 168, 163, 204)),
];

/// The parsed overlay topology, relative to one local node.
#[derive(Debug, Clone)]
pub struct Topology {
    my_node: NodeId,
    nodes: Vec<NodeId>,
    links: FxHashMap<(NodeId, NodeId), u32>,
}

impl Topology {
    /// Parses `path` and fixes `my_node` as the local endpoint.
    pub fn load(path: impl AsRef<Path>, my_node: NodeId) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::parse(&text, my_node)
    }

    /// Parses topology data. Lines that do not name two `netlab_` hosts and
    /// a cost are skipped with a warning, matching a hand-edited lab file.
    pub fn parse(text: &str, my_node: NodeId) -> Result<Self> {
        let mut links = FxHashMap::default();
        let mut nodes = Vec::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let entry = (|| {
                let a = node_id_from_name(fields.next()?)?;
                let b = node_id_from_name(fields.next()?)?;
                let cost = fields.next()?.parse::<u32>().ok()?;
                Some((a, b, cost))
            })();
            let Some((a, b, cost)) = entry else {
                tracing::warn!(target: "snet/topology", "skipping malformed topology line: {line:?}");
                continue;
            };

            links.insert((a, b), cost);
            links.insert((b, a), cost);
            for n in [a, b] {
                if !nodes.contains(&n) {
                    nodes.push(n);
                }
            }
        }

        if nodes.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "topology file names no links",
            ));
        }
        nodes.sort_unstable();

        Ok(Self {
            my_node,
            nodes,
            links,
        })
    }

    pub fn my_node(&self) -> NodeId {
        self.my_node
    }

    /// All node ids in the overlay, ascending.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Direct neighbors of the local node, ascending.
    pub fn neighbors(&self) -> Vec<NodeId> {
        self.neighbors_of(self.my_node)
    }

    pub fn neighbors_of(&self, node: NodeId) -> Vec<NodeId> {
        self.nodes
            .iter()
            .copied()
            .filter(|&n| self.links.contains_key(&(node, n)))
            .collect()
    }

    /// Direct link cost, or [`INFINITE_COST`] when no link exists.
    pub fn cost(&self, from: NodeId, to: NodeId) -> u32 {
        self.links.get(&(from, to)).copied().unwrap_or(INFINITE_COST)
    }
}

/// Node id encoded in a `netlab_<N>` hostname.
pub fn node_id_from_name(hostname: &str) -> Option<NodeId> {
    let id = hostname.strip_prefix("netlab_")?.parse::<NodeId>().ok()?;
    (id > 0).then_some(id)
}

/// Address of a node per the compiled-in host table.
pub fn host_addr(node: NodeId) -> Option<Ipv4Addr> {
    TOPO_HOSTS
        .iter()
        .find(|(name, _)| node_id_from_name(name) == Some(node))
        .map(|&(_, addr)| addr)
}

/// Node id owning `addr` per the compiled-in host table.
pub fn node_id_from_addr(addr: Ipv4Addr) -> Option<NodeId> {
    TOPO_HOSTS
        .iter()
        .find(|&&(_, a)| a == addr)
        .and_then(|(name, _)| node_id_from_name(name))
}

/// Resolves the local node id: `SNET_NODE` override, else the OS hostname.
pub fn self_node_id() -> Result<NodeId> {
    if let Ok(v) = std::env::var("SNET_NODE") {
        return v
            .parse::<NodeId>()
            .map_err(|_| Error::new(ErrorKind::InvalidInput, "SNET_NODE is not a node id"));
    }
    let hostname = os_hostname()?;
    node_id_from_name(&hostname).ok_or_else(|| {
        Error::new(
            ErrorKind::NotFound,
            format!("hostname {hostname:?} carries no node id"),
        )
    })
}

#[cfg(unix)]
fn os_hostname() -> Result<String> {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
    if rc != 0 {
        return Err(Error::last_os_error());
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

#[cfg(not(unix))]
fn os_hostname() -> Result<String> {
    Err(Error::new(
        ErrorKind::Unsupported,
        "no hostname source on this platform, set SNET_NODE",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINEAR: &str = "netlab_1 netlab_2 1\nnetlab_2 netlab_3 1\nnetlab_3 netlab_4 1\n";

    #[test]
    fn parses_linear_topology() -> Result<()> {
        let topo = Topology::parse(LINEAR, 2)?;
        assert_eq!(topo.nodes(), &[1, 2, 3, 4]);
        assert_eq!(topo.neighbors(), vec![1, 3]);
        assert_eq!(topo.cost(2, 3), 1);
        assert_eq!(topo.cost(3, 2), 1);
        assert_eq!(topo.cost(1, 4), INFINITE_COST);
        Ok(())
    }

    #[test]
    fn skips_malformed_lines() -> Result<()> {
        let text = "netlab_1 netlab_2 7\nbogus line here\nnetlab_2 netlab_3 oops\n";
        let topo = Topology::parse(text, 1)?;
        assert_eq!(topo.nodes(), &[1, 2]);
        assert_eq!(topo.cost(1, 2), 7);
        Ok(())
    }

    #[test]
    fn empty_topology_rejected() {
        assert!(Topology::parse("\n\n", 1).is_err());
    }

    #[test]
    fn hostname_parsing() {
        assert_eq!(node_id_from_name("netlab_3"), Some(3));
        assert_eq!(node_id_from_name("netlab_0"), None);
        assert_eq!(node_id_from_name("other_3"), None);
        assert_eq!(host_addr(2), Some(Ipv4Addr::new(192, 168, 163, 202)));
        assert_eq!(node_id_from_addr(Ipv4Addr::new(192, 168, 163, 204)), Some(4));
    }
}
