//! The server-side transport: accepting connections, in-order receive,
//! cumulative acknowledgements.

use std::{
    io::{Error, ErrorKind, Result},
    sync::{Arc, Mutex},
};

use tokio::{
    io::BufReader,
    net::TcpStream,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::sleep,
};

use snet_types::{NodeId, Segment, SegmentKind};

use crate::chan::{SegSink, SegStream};

use super::{recvbuf::RecvBuffer, StcpConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
    Closed,
    Listening,
    Connected,
    CloseWait,
}

impl ServerState {
    fn transition_to(&mut self, new: Self) {
        tracing::debug!(target: "snet/stcp", "server fsm {self:?} -> {new:?}");
        *self = new;
    }
}

struct ServerTcb {
    local_port: u32,
    peer_node: Option<NodeId>,
    peer_port: u32,
    state: ServerState,
    expect_seq: u32,
    recvbuf: Arc<Mutex<RecvBuffer>>,
}

struct ServerCtx {
    cfg: StcpConfig,
    local_node: NodeId,
    tx: UnboundedSender<(NodeId, Segment)>,
    tcbs: Mutex<Vec<Option<ServerTcb>>>,
}

/// The server endpoint: a TCB table plus the segment-handler task reading
/// from the local SIP stream.
pub struct StcpServer {
    ctx: Arc<ServerCtx>,
}

impl StcpServer {
    /// Takes ownership of the established stream to the local SIP process
    /// and spawns the endpoint's long-running tasks.
    pub fn new(stream: TcpStream, local_node: NodeId, cfg: StcpConfig) -> Self {
        let (read, write) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let slots = (0..cfg.max_connections).map(|_| None).collect();
        let loss_rate = cfg.loss_rate;

        let ctx = Arc::new(ServerCtx {
            cfg,
            local_node,
            tx,
            tcbs: Mutex::new(slots),
        });
        tracing::info!(target: "snet/stcp", "server endpoint up on node {}", ctx.local_node);

        tokio::spawn(writer(rx, SegSink::new(write)));
        tokio::spawn(seghandler(
            ctx.clone(),
            SegStream::new(BufReader::new(read), loss_rate),
        ));

        Self { ctx }
    }

    /// Allocates a TCB in CLOSED bound to `local_port`, with an empty
    /// receive buffer.
    pub fn sock(&self, local_port: u32) -> Result<usize> {
        let mut tcbs = self.ctx.tcbs.lock().unwrap();
        if tcbs
            .iter()
            .flatten()
            .any(|tcb| tcb.local_port == local_port)
        {
            return Err(Error::new(ErrorKind::AddrInUse, "port already bound"));
        }
        let Some(idx) = tcbs.iter().position(Option::is_none) else {
            return Err(Error::new(
                ErrorKind::Other,
                "transport connection table full",
            ));
        };
        tcbs[idx] = Some(ServerTcb {
            local_port,
            peer_node: None,
            peer_port: 0,
            state: ServerState::Closed,
            expect_seq: 0,
            recvbuf: Arc::new(Mutex::new(RecvBuffer::new(self.ctx.cfg.recv_buf_size))),
        });
        Ok(idx)
    }

    /// Moves the socket to LISTENING and blocks until a SYN promotes it to
    /// CONNECTED. The wait polls the TCB state; it is unbounded.
    pub async fn accept(&self, sock: usize) -> Result<()> {
        {
            let mut tcbs = self.ctx.tcbs.lock().unwrap();
            let tcb = tcb_mut(&mut tcbs, sock)?;
            if tcb.state != ServerState::Closed {
                return Err(illegal_state("accept", "CLOSED"));
            }
            tcb.state.transition_to(ServerState::Listening);
        }
        loop {
            sleep(self.ctx.cfg.accept_polling_interval).await;
            let tcbs = self.ctx.tcbs.lock().unwrap();
            if tcb_ref(&tcbs, sock)?.state == ServerState::Connected {
                return Ok(());
            }
        }
    }

    /// Blocks until at least `buf.len()` contiguous bytes are available,
    /// then fills `buf` with exactly that many.
    pub async fn recv(&self, sock: usize, buf: &mut [u8]) -> Result<()> {
        let recvbuf = {
            let tcbs = self.ctx.tcbs.lock().unwrap();
            let tcb = tcb_ref(&tcbs, sock)?;
            if tcb.state != ServerState::Connected {
                return Err(illegal_state("recv", "CONNECTED"));
            }
            tcb.recvbuf.clone()
        };
        loop {
            {
                let mut b = recvbuf.lock().unwrap();
                if b.len() >= buf.len() {
                    b.consume_into(buf);
                    return Ok(());
                }
            }
            sleep(self.ctx.cfg.recvbuf_polling_interval).await;
        }
    }

    /// Frees the TCB slot. Only legal in CLOSED.
    pub fn close(&self, sock: usize) -> Result<()> {
        let mut tcbs = self.ctx.tcbs.lock().unwrap();
        let slot = tcbs.get_mut(sock).ok_or_else(no_socket)?;
        match slot {
            Some(tcb) if tcb.state == ServerState::Closed => {
                *slot = None;
                Ok(())
            }
            Some(_) => Err(illegal_state("close", "CLOSED")),
            None => Err(no_socket()),
        }
    }
}

impl ServerCtx {
    fn transmit(&self, node: NodeId, seg: Segment) {
        if self.tx.send((node, seg)).is_err() {
            tracing::error!(target: "snet/stcp", "sip channel gone, segment dropped");
        }
    }
}

async fn writer(
    mut rx: UnboundedReceiver<(NodeId, Segment)>,
    mut sink: SegSink<tokio::net::tcp::OwnedWriteHalf>,
) {
    while let Some((node, seg)) = rx.recv().await {
        if let Err(e) = sink.send(node, &seg).await {
            tracing::error!(target: "snet/stcp", "sip channel write failed: {e}");
            return;
        }
    }
}

async fn seghandler(
    ctx: Arc<ServerCtx>,
    mut stream: SegStream<BufReader<tokio::net::tcp::OwnedReadHalf>>,
) {
    loop {
        match stream.recv().await {
            Err(e) => {
                tracing::info!(target: "snet/stcp", "sip channel closed: {e}");
                return;
            }
            Ok(None) => continue,
            Ok(Some((src_node, seg))) => handle_segment(&ctx, src_node, seg),
        }
    }
}

fn handle_segment(ctx: &Arc<ServerCtx>, src_node: NodeId, seg: Segment) {
    let mut tcbs = ctx.tcbs.lock().unwrap();
    let Some(idx) = tcbs
        .iter()
        .position(|slot| slot.as_ref().is_some_and(|t| t.local_port == seg.header.dest_port))
    else {
        tracing::warn!(
            target: "snet/stcp",
            "no socket bound to port {}, segment dropped", seg.header.dest_port,
        );
        return;
    };
    let tcb = tcbs[idx].as_mut().expect("slot checked above");

    let from_peer = tcb.peer_node == Some(src_node) && tcb.peer_port == seg.header.src_port;
    match tcb.state {
        ServerState::Closed => {}
        ServerState::Listening => {
            if seg.kind() == SegmentKind::Syn {
                tcb.peer_node = Some(src_node);
                tcb.peer_port = seg.header.src_port;
                tcb.expect_seq = seg.header.seq;
                tcb.state.transition_to(ServerState::Connected);
                ctx.transmit(
                    src_node,
                    Segment::synack(tcb.local_port, tcb.peer_port, tcb.expect_seq),
                );
            } else {
                tracing::trace!(target: "snet/stcp", "ignoring {} in LISTENING", seg.kind());
            }
        }
        ServerState::Connected => match seg.kind() {
            SegmentKind::Syn if from_peer => {
                // Handshake ack was lost; the SYNACK is idempotent.
                ctx.transmit(
                    src_node,
                    Segment::synack(tcb.local_port, tcb.peer_port, tcb.expect_seq),
                );
            }
            SegmentKind::Data if from_peer => {
                if seg.header.seq == tcb.expect_seq {
                    let mut buf = tcb.recvbuf.lock().unwrap();
                    if buf.append(&seg.payload) {
                        tcb.expect_seq = tcb.expect_seq.wrapping_add(seg.payload.len() as u32);
                    } else {
                        tracing::debug!(
                            target: "snet/stcp",
                            "receive buffer full, payload dropped [seq {}]", seg.header.seq,
                        );
                    }
                } else {
                    tracing::trace!(
                        target: "snet/stcp",
                        "out-of-order data dropped [seq {} != expected {}]",
                        seg.header.seq, tcb.expect_seq,
                    );
                }
                // Always acknowledge the contiguous prefix.
                ctx.transmit(
                    src_node,
                    Segment::dataack(tcb.local_port, tcb.peer_port, tcb.expect_seq),
                );
            }
            SegmentKind::Fin if from_peer => {
                tcb.state.transition_to(ServerState::CloseWait);
                ctx.transmit(
                    src_node,
                    Segment::finack(tcb.local_port, tcb.peer_port, tcb.expect_seq),
                );
                start_closewait_timer(ctx, idx);
            }
            kind => {
                tracing::trace!(target: "snet/stcp", "ignoring {kind} in CONNECTED");
            }
        },
        ServerState::CloseWait => {
            if seg.kind() == SegmentKind::Fin && from_peer {
                // FINACK was lost; repeat it.
                ctx.transmit(
                    src_node,
                    Segment::finack(tcb.local_port, tcb.peer_port, tcb.expect_seq),
                );
            } else {
                tracing::trace!(target: "snet/stcp", "ignoring {} in CLOSEWAIT", seg.kind());
            }
        }
    }
}

/// After `closewait_timeout` the connection returns to CLOSED and the peer
/// binding is cleared, making the socket reusable by `accept`.
fn start_closewait_timer(ctx: &Arc<ServerCtx>, sock: usize) {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        sleep(ctx.cfg.closewait_timeout).await;
        let mut tcbs = ctx.tcbs.lock().unwrap();
        let Some(Some(tcb)) = tcbs.get_mut(sock) else {
            return;
        };
        if tcb.state == ServerState::CloseWait {
            tcb.state.transition_to(ServerState::Closed);
            tcb.peer_node = None;
            tcb.peer_port = 0;
            tcb.expect_seq = 0;
        }
    });
}

fn tcb_ref<'a>(tcbs: &'a [Option<ServerTcb>], sock: usize) -> Result<&'a ServerTcb> {
    tcbs.get(sock).and_then(Option::as_ref).ok_or_else(no_socket)
}

fn tcb_mut<'a>(tcbs: &'a mut [Option<ServerTcb>], sock: usize) -> Result<&'a mut ServerTcb> {
    tcbs.get_mut(sock).and_then(Option::as_mut).ok_or_else(no_socket)
}

fn no_socket() -> Error {
    Error::new(ErrorKind::NotFound, "no such socket")
}

fn illegal_state(op: &str, wanted: &str) -> Error {
    Error::new(
        ErrorKind::InvalidInput,
        format!("{op} is only legal in {wanted}"),
    )
}
