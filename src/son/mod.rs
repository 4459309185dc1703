//! SON, the self-organizing overlay.
//!
//! The SON process builds one TCP link per topological neighbor (accepting
//! from higher-id neighbors, dialing lower-id ones), then forwards packets:
//! overlay→SIP on every neighbor link, SIP→overlay with next-hop dispatch
//! and broadcast fan-out.

use std::{
    io::{Error, ErrorKind, Result},
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use tokio::{
    io::BufReader,
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
    sync::mpsc::{self, UnboundedReceiver},
    time::sleep,
};

use snet_types::{NodeId, SipPacket, BROADCAST_NODEID};

use crate::{
    chan::{PktSink, PktStream},
    config,
    topology::{self, Topology},
};

mod neighbors;
pub use neighbors::NeighborTable;

const DIAL_RETRIES: usize = 10;
const DIAL_BACKOFF: Duration = Duration::from_secs(2);

/// Configuration of the SON process.
#[derive(Debug, Clone)]
pub struct SonConfig {
    /// Overlay port neighbors connect to.
    pub connection_port: u16,
    /// Address served to the local SIP process.
    pub listen_addr: SocketAddr,
    /// Path of the topology file.
    pub topology: PathBuf,
    /// Grace period for the other overlay nodes to start listening before
    /// outbound links are dialed.
    pub start_delay: Duration,
}

impl Default for SonConfig {
    fn default() -> Self {
        Self {
            connection_port: config::connection_port(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], config::son_addr().port())),
            topology: config::topology_path(),
            start_delay: Duration::from_secs(10),
        }
    }
}

/// Runs the SON process. Returns only on a failed initialization; the
/// steady state serves forever.
pub async fn run(cfg: SonConfig) -> Result<()> {
    let my_node = topology::self_node_id()?;
    let topo = Topology::load(&cfg.topology, my_node)?;
    let mut nbrs = NeighborTable::new(&topo)?;
    tracing::info!(
        target: "snet/son",
        "node {my_node} initializing, neighbors {:?}", nbrs.nodes(),
    );

    // Inbound links come from neighbors with a higher node id; they dial us
    // while we dial everyone below. Listening starts before the grace sleep
    // so no neighbor races our bind.
    let listener =
        TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], cfg.connection_port))).await?;
    let higher: Vec<NodeId> = nbrs.nodes().into_iter().filter(|&n| n > my_node).collect();
    let accept_task = tokio::spawn(accept_higher(listener, higher));

    sleep(cfg.start_delay).await;

    let mut links = Vec::new();
    for node in nbrs.nodes().into_iter().filter(|&n| n < my_node) {
        let addr = nbrs.addr(node).expect("neighbor table entry");
        let target = SocketAddr::from((addr, cfg.connection_port));
        tracing::info!(target: "snet/son", "dialing neighbor {node} at {target}");
        links.push((node, dial(target).await?));
    }
    links.extend(
        accept_task
            .await
            .map_err(|e| Error::new(ErrorKind::Other, e))?,
    );
    tracing::info!(target: "snet/son", "all {} neighbor links up", links.len());

    // Write half of the currently attached SIP process, if any.
    let sip_out: Arc<tokio::sync::Mutex<Option<PktSink<OwnedWriteHalf>>>> =
        Arc::new(tokio::sync::Mutex::new(None));

    for (node, stream) in links {
        let (r, w) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        nbrs.attach(node, tx);
        tokio::spawn(link_writer(node, rx, PktSink::new(w)));
        tokio::spawn(link_reader(
            node,
            PktStream::new(BufReader::new(r)),
            sip_out.clone(),
        ));
    }

    serve_sip(&cfg, Arc::new(nbrs), sip_out).await
}

/// Accepts inbound overlay links until every expected neighbor is
/// connected, matching peers by their compiled-in address.
async fn accept_higher(
    listener: TcpListener,
    mut expected: Vec<NodeId>,
) -> Vec<(NodeId, TcpStream)> {
    let mut links = Vec::new();
    while !expected.is_empty() {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(target: "snet/son", "overlay accept failed: {e}");
                continue;
            }
        };
        let node = match peer.ip() {
            IpAddr::V4(v4) => topology::node_id_from_addr(v4),
            IpAddr::V6(_) => None,
        };
        match node.filter(|n| expected.contains(n)) {
            Some(node) => {
                tracing::info!(target: "snet/son", "accepted neighbor {node} from {peer}");
                expected.retain(|&n| n != node);
                links.push((node, stream));
            }
            None => {
                tracing::warn!(target: "snet/son", "unexpected overlay connection from {peer}");
            }
        }
    }
    links
}

async fn dial(target: SocketAddr) -> Result<TcpStream> {
    let mut last = None;
    for attempt in 1..=DIAL_RETRIES {
        match TcpStream::connect(target).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::warn!(
                    target: "snet/son",
                    "dial {target} failed ({attempt}/{DIAL_RETRIES}): {e}",
                );
                last = Some(e);
                sleep(DIAL_BACKOFF).await;
            }
        }
    }
    Err(last.unwrap_or_else(|| Error::new(ErrorKind::TimedOut, "dial failed")))
}

/// Drains one neighbor link's outbound queue.
async fn link_writer(
    node: NodeId,
    mut rx: UnboundedReceiver<SipPacket>,
    mut sink: PktSink<OwnedWriteHalf>,
) {
    while let Some(pkt) = rx.recv().await {
        if let Err(e) = sink.send(&pkt).await {
            tracing::warn!(target: "snet/son", "link to neighbor {node} broke: {e}");
            return;
        }
    }
}

/// Forwards every packet arriving on one neighbor link to the local SIP
/// process.
async fn link_reader(
    node: NodeId,
    mut pkts: PktStream<BufReader<OwnedReadHalf>>,
    sip_out: Arc<tokio::sync::Mutex<Option<PktSink<OwnedWriteHalf>>>>,
) {
    loop {
        match pkts.recv().await {
            Err(e) => {
                tracing::warn!(target: "snet/son", "neighbor {node} link closed: {e}");
                return;
            }
            Ok(None) => continue,
            Ok(Some(pkt)) => {
                let mut out = sip_out.lock().await;
                match out.as_mut() {
                    Some(sink) => {
                        if let Err(e) = sink.send(&pkt).await {
                            tracing::warn!(target: "snet/son", "sip delivery failed: {e}");
                            *out = None;
                        }
                    }
                    None => {
                        tracing::debug!(
                            target: "snet/son",
                            "no sip process attached, packet dropped",
                        );
                    }
                }
            }
        }
    }
}

/// Serves the local SIP process: decodes `(next hop, packet)` tuples and
/// dispatches them onto neighbor links, fanning broadcasts out to all of
/// them. A detached SIP process is simply re-accepted.
async fn serve_sip(
    cfg: &SonConfig,
    nbrs: Arc<NeighborTable>,
    sip_out: Arc<tokio::sync::Mutex<Option<PktSink<OwnedWriteHalf>>>>,
) -> Result<()> {
    let listener = TcpListener::bind(cfg.listen_addr).await?;
    tracing::info!(target: "snet/son", "waiting for sip process on {}", cfg.listen_addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::info!(target: "snet/son", "sip process attached from {peer}");
        let (r, w) = stream.into_split();
        *sip_out.lock().await = Some(PktSink::new(w));

        let mut pkts = PktStream::new(BufReader::new(r));
        loop {
            match pkts.recv_routed().await {
                Err(e) => {
                    tracing::info!(target: "snet/son", "sip process detached: {e}");
                    break;
                }
                Ok(None) => continue,
                Ok(Some((next_hop, pkt))) => dispatch(&nbrs, next_hop, pkt),
            }
        }
        *sip_out.lock().await = None;
    }
}

fn dispatch(nbrs: &NeighborTable, next_hop: NodeId, pkt: SipPacket) {
    if next_hop == BROADCAST_NODEID {
        for (node, tx) in nbrs.senders() {
            if tx.send(pkt.clone()).is_err() {
                tracing::warn!(target: "snet/son", "link to neighbor {node} down, skipped");
            }
        }
    } else {
        match nbrs.sender(next_hop) {
            Some(tx) => {
                if tx.send(pkt).is_err() {
                    tracing::warn!(target: "snet/son", "link to neighbor {next_hop} down, packet dropped");
                }
            }
            None => {
                tracing::warn!(target: "snet/son", "no link to next hop {next_hop}, packet dropped");
            }
        }
    }
}
