//! SIP, the overlay network layer.
//!
//! The SIP process connects downstream to the local SON process, serves the
//! local STCP endpoint, and runs three long-lived tasks: the overlay packet
//! handler (routing updates in, transit forwarding, upstream delivery), the
//! periodic route-update broadcaster, and the forwarding plane reading
//! `(destination, segment)` tuples from STCP.

use std::{
    io::Result,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{
    io::BufReader,
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::sleep,
};

use snet_types::{NodeId, PacketKind, SipPacket, BROADCAST_NODEID};

use crate::{
    chan::{PktSink, PktStream, SegSink, SegStream},
    config,
    topology::{self, Topology},
};

mod dv;
mod nbrcost;
mod routes;

pub use dv::DvTable;
pub use nbrcost::NbrCostTable;
pub use routes::RoutingTable;

/// Configuration of the SIP process.
#[derive(Debug, Clone)]
pub struct SipConfig {
    /// Address of the local SON service.
    pub son_addr: SocketAddr,
    /// Address served to the local STCP endpoint.
    pub listen_addr: SocketAddr,
    /// Path of the topology file.
    pub topology: PathBuf,
    /// Period of the distance-vector broadcast.
    pub route_update_interval: Duration,
}

impl Default for SipConfig {
    fn default() -> Self {
        Self {
            son_addr: config::son_addr(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], config::sip_addr().port())),
            topology: config::topology_path(),
            route_update_interval: Duration::from_secs(5),
        }
    }
}

/// Runs the SIP process. Returns only on a failed initialization; the
/// steady state serves forever.
pub async fn run(cfg: SipConfig) -> Result<()> {
    let my_node = topology::self_node_id()?;
    let topo = Topology::load(&cfg.topology, my_node)?;

    let nct = NbrCostTable::new(&topo);
    let dv = Arc::new(Mutex::new(DvTable::new(&topo, &nct)));
    let routes = Arc::new(Mutex::new(RoutingTable::new(&topo)));
    tracing::info!(target: "snet/sip", "node {my_node} starting; {nct}");
    tracing::info!(target: "snet/sip", "{}", dv.lock().unwrap());

    let son = TcpStream::connect(cfg.son_addr).await?;
    tracing::info!(target: "snet/sip", "connected to son at {}", cfg.son_addr);
    let (son_r, son_w) = son.into_split();
    let (son_tx, son_rx) = mpsc::unbounded_channel();
    tokio::spawn(son_writer(son_rx, PktSink::new(son_w)));

    // Write half of the currently attached STCP endpoint, if any.
    let stcp_out: Arc<tokio::sync::Mutex<Option<SegSink<OwnedWriteHalf>>>> =
        Arc::new(tokio::sync::Mutex::new(None));

    tokio::spawn(pkt_handler(
        my_node,
        PktStream::new(BufReader::new(son_r)),
        dv.clone(),
        routes.clone(),
        son_tx.clone(),
        stcp_out.clone(),
    ));
    tokio::spawn(broadcaster(
        my_node,
        cfg.route_update_interval,
        dv,
        son_tx.clone(),
    ));

    serve_stcp(&cfg, my_node, routes, son_tx, stcp_out).await
}

/// Funnels `(next hop, packet)` tuples from every producer onto the SON
/// stream.
async fn son_writer(
    mut rx: UnboundedReceiver<(NodeId, SipPacket)>,
    mut sink: PktSink<OwnedWriteHalf>,
) {
    while let Some((next_hop, pkt)) = rx.recv().await {
        if let Err(e) = sink.send_routed(next_hop, &pkt).await {
            tracing::error!(target: "snet/sip", "son channel write failed: {e}");
            return;
        }
    }
}

/// Handles packets arriving from the overlay.
async fn pkt_handler(
    my_node: NodeId,
    mut pkts: PktStream<BufReader<OwnedReadHalf>>,
    dv: Arc<Mutex<DvTable>>,
    routes: Arc<Mutex<RoutingTable>>,
    son_tx: UnboundedSender<(NodeId, SipPacket)>,
    stcp_out: Arc<tokio::sync::Mutex<Option<SegSink<OwnedWriteHalf>>>>,
) {
    loop {
        let pkt = match pkts.recv().await {
            Err(e) => {
                tracing::error!(target: "snet/sip", "son channel closed: {e}");
                return;
            }
            Ok(None) => continue,
            Ok(Some(pkt)) => pkt,
        };

        match pkt.header.kind {
            PacketKind::Sip => {
                if pkt.header.dest_node == my_node {
                    deliver_upstream(&stcp_out, &pkt).await;
                } else {
                    let next_hop = routes.lock().unwrap().next_hop(pkt.header.dest_node);
                    if let Some(next_hop) = next_hop {
                        tracing::debug!(
                            target: "snet/sip",
                            "transit packet node {} -> {} via {next_hop}",
                            pkt.header.src_node, pkt.header.dest_node,
                        );
                        let _ = son_tx.send((next_hop, pkt));
                    } else {
                        tracing::debug!(
                            target: "snet/sip",
                            "no route to node {}, transit packet dropped", pkt.header.dest_node,
                        );
                    }
                }
            }
            PacketKind::RouteUpdate => {
                let update = match pkt.update() {
                    Ok(update) => update,
                    Err(e) => {
                        tracing::warn!(target: "snet/sip", "malformed route update: {e}");
                        continue;
                    }
                };
                let mut dv = dv.lock().unwrap();
                let mut routes = routes.lock().unwrap();
                dv.apply_update(pkt.header.src_node, &update, &mut routes);
            }
        }
    }
}

/// Hands a packet's segment to the attached STCP endpoint, tagged with the
/// packet's source node.
async fn deliver_upstream(
    stcp_out: &tokio::sync::Mutex<Option<SegSink<OwnedWriteHalf>>>,
    pkt: &SipPacket,
) {
    let seg = match pkt.segment() {
        Ok(seg) => seg,
        Err(e) => {
            tracing::warn!(target: "snet/sip", "undecodable segment payload: {e}");
            return;
        }
    };
    let mut out = stcp_out.lock().await;
    match out.as_mut() {
        Some(sink) => {
            if let Err(e) = sink.send(pkt.header.src_node, &seg).await {
                tracing::warn!(target: "snet/sip", "stcp delivery failed: {e}");
                *out = None;
            }
        }
        None => {
            tracing::debug!(target: "snet/sip", "no stcp endpoint attached, segment dropped");
        }
    }
}

/// Broadcasts the local distance vector every `interval`.
async fn broadcaster(
    my_node: NodeId,
    interval: Duration,
    dv: Arc<Mutex<DvTable>>,
    son_tx: UnboundedSender<(NodeId, SipPacket)>,
) {
    loop {
        sleep(interval).await;
        let vector = dv.lock().unwrap().self_vector();
        let pkt = match SipPacket::route_update(my_node, &vector) {
            Ok(pkt) => pkt,
            Err(e) => {
                tracing::error!(target: "snet/sip", "route update encoding failed: {e}");
                continue;
            }
        };
        tracing::trace!(
            target: "snet/sip",
            "broadcasting route update with {} entries", vector.entries.len(),
        );
        if son_tx.send((BROADCAST_NODEID, pkt)).is_err() {
            return;
        }
    }
}

/// Serves the local STCP endpoint: the forwarding plane. When the endpoint
/// disconnects the listener simply accepts the next one.
async fn serve_stcp(
    cfg: &SipConfig,
    my_node: NodeId,
    routes: Arc<Mutex<RoutingTable>>,
    son_tx: UnboundedSender<(NodeId, SipPacket)>,
    stcp_out: Arc<tokio::sync::Mutex<Option<SegSink<OwnedWriteHalf>>>>,
) -> Result<()> {
    let listener = TcpListener::bind(cfg.listen_addr).await?;
    tracing::info!(target: "snet/sip", "waiting for stcp endpoint on {}", cfg.listen_addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::info!(target: "snet/sip", "stcp endpoint attached from {peer}");
        let (r, w) = stream.into_split();
        *stcp_out.lock().await = Some(SegSink::new(w));

        let mut segs = SegStream::new(BufReader::new(r), 0.0);
        loop {
            match segs.recv().await {
                Err(e) => {
                    tracing::info!(target: "snet/sip", "stcp endpoint detached: {e}");
                    break;
                }
                Ok(None) => continue,
                Ok(Some((dest_node, seg))) => {
                    let next_hop = routes.lock().unwrap().next_hop(dest_node);
                    let Some(next_hop) = next_hop else {
                        tracing::debug!(
                            target: "snet/sip",
                            "no route to node {dest_node}, segment dropped",
                        );
                        continue;
                    };
                    match SipPacket::encapsulate(my_node, dest_node, &seg) {
                        Ok(pkt) => {
                            let _ = son_tx.send((next_hop, pkt));
                        }
                        Err(e) => {
                            tracing::warn!(target: "snet/sip", "encapsulation failed: {e}");
                        }
                    }
                }
            }
        }
        *stcp_out.lock().await = None;
    }
}
