//! The client-side transport: connection setup, Go-Back-N sending,
//! teardown.

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

use super::{sendbuf::SendBuffer, StcpConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Closed,
    SynSent,
    Connected,
    FinWait,
}

impl ClientState {
    fn transition_to(&mut self, new: Self) {
        tracing::debug!(target: "snet/stcp", "client fsm {self:?} -> {new:?}");
        *self = new;
    }
}

struct ClientTcb {
    local_port: u32,
    peer_node: Option<NodeId>,
    peer_port: u32,
    state: ClientState,
    sendbuf: Arc<Mutex<SendBuffer>>,
}

struct ClientCtx {
    cfg: StcpConfig,
    local_node: NodeId,
    tx: UnboundedSender<(NodeId, Segment)>,
    tcbs: Mutex<Vec<Option<ClientTcb>>>,
}

/// The client endpoint: a TCB table plus the segment-handler task reading
/// from the local SIP stream.
///
/// All operations address connections by the socket id returned from
/// [`StcpClient::sock`]. `connect`/`disconnect` block (bounded by their
/// retry budgets); `send` queues without blocking.
pub struct StcpClient {
    ctx: Arc<ClientCtx>,
}

impl StcpClient {
    /// Takes ownership of the established stream to the local SIP process
    /// and spawns the endpoint's long-running tasks. `local_node` is this
    /// endpoint's overlay node id.
    pub fn new(stream: TcpStream, local_node: NodeId, cfg: StcpConfig) -> Self {
        let (read, write) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let slots = (0..cfg.max_connections).map(|_| None).collect();
        let loss_rate = cfg.loss_rate;

        let ctx = Arc::new(ClientCtx {
            cfg,
            local_node,
            tx,
            tcbs: Mutex::new(slots),
        });
        tracing::info!(target: "snet/stcp", "client endpoint up on node {}", ctx.local_node);

        tokio::spawn(writer(rx, SegSink::new(write)));
        tokio::spawn(seghandler(
            ctx.clone(),
            SegStream::new(BufReader::new(read), loss_rate),
        ));

        Self { ctx }
    }

    /// Allocates a TCB in CLOSED bound to `local_port`.
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
        tcbs[idx] = Some(ClientTcb {
            local_port,
            peer_node: None,
            peer_port: 0,
            state: ClientState::Closed,
            sendbuf: Arc::new(Mutex::new(SendBuffer::new(
                self.ctx.cfg.gbn_window,
                self.ctx.tx.clone(),
            ))),
        });
        Ok(idx)
    }

    /// Performs the SYN handshake towards `(server_node, server_port)`.
    ///
    /// Retransmits the SYN up to `syn_max_retry` times every `syn_timeout`;
    /// exhaustion forces the TCB back to CLOSED and reports `TimedOut`.
    pub async fn connect(&self, sock: usize, server_node: NodeId, server_port: u32) -> Result<()> {
        let syn = {
            let mut tcbs = self.ctx.tcbs.lock().unwrap();
            let tcb = tcb_mut(&mut tcbs, sock)?;
            if tcb.state != ClientState::Closed {
                return Err(illegal_state("connect", "CLOSED"));
            }
            tcb.peer_node = Some(server_node);
            tcb.peer_port = server_port;
            tcb.sendbuf.lock().unwrap().set_peer(server_node);
            tcb.state.transition_to(ClientState::SynSent);
            Segment::syn(tcb.local_port, server_port)
        };
        self.ctx.transmit(server_node, syn.clone());

        for attempt in 1..=self.ctx.cfg.syn_max_retry {
            sleep(self.ctx.cfg.syn_timeout).await;
            {
                let tcbs = self.ctx.tcbs.lock().unwrap();
                if tcb_ref(&tcbs, sock)?.state == ClientState::Connected {
                    return Ok(());
                }
            }
            tracing::debug!(
                target: "snet/stcp",
                "syn resent ({attempt}/{})", self.ctx.cfg.syn_max_retry,
            );
            self.ctx.transmit(server_node, syn.clone());
        }

        let mut tcbs = self.ctx.tcbs.lock().unwrap();
        tcb_mut(&mut tcbs, sock)?.state.transition_to(ClientState::Closed);
        Err(Error::new(ErrorKind::TimedOut, "connection setup timed out"))
    }

    /// Chunks `data` into DATA segments, queues them and transmits as much
    /// of the window as is open. Never blocks.
    pub fn send(&self, sock: usize, data: &[u8]) -> Result<()> {
        let sendbuf = {
            let tcbs = self.ctx.tcbs.lock().unwrap();
            let tcb = tcb_ref(&tcbs, sock)?;
            if tcb.state != ClientState::Connected {
                return Err(illegal_state("send", "CONNECTED"));
            }
            let mut buf = tcb.sendbuf.lock().unwrap();
            for chunk in data.chunks(snet_types::MAX_SEG_LEN) {
                buf.append(tcb.local_port, tcb.peer_port, chunk.to_vec());
            }
            tcb.sendbuf.clone()
        };
        self.ctx.pump(&sendbuf);
        Ok(())
    }

    /// Performs the FIN handshake. On completion (or retry exhaustion) the
    /// TCB ends up CLOSED with its send buffer cleared and the peer binding
    /// reset.
    pub async fn disconnect(&self, sock: usize) -> Result<()> {
        let (fin, peer_node) = {
            let mut tcbs = self.ctx.tcbs.lock().unwrap();
            let tcb = tcb_mut(&mut tcbs, sock)?;
            if tcb.state != ClientState::Connected {
                return Err(illegal_state("disconnect", "CONNECTED"));
            }
            let node = tcb.peer_node.expect("connected tcb has a peer");
            tcb.state.transition_to(ClientState::FinWait);
            (Segment::fin(tcb.local_port, tcb.peer_port), node)
        };
        self.ctx.transmit(peer_node, fin.clone());

        for attempt in 1..=self.ctx.cfg.fin_max_retry {
            sleep(self.ctx.cfg.fin_timeout).await;
            {
                let mut tcbs = self.ctx.tcbs.lock().unwrap();
                let tcb = tcb_mut(&mut tcbs, sock)?;
                if tcb.state == ClientState::Closed {
                    reset_binding(tcb);
                    return Ok(());
                }
            }
            tracing::debug!(
                target: "snet/stcp",
                "fin resent ({attempt}/{})", self.ctx.cfg.fin_max_retry,
            );
            self.ctx.transmit(peer_node, fin.clone());
        }

        let mut tcbs = self.ctx.tcbs.lock().unwrap();
        let tcb = tcb_mut(&mut tcbs, sock)?;
        tcb.state.transition_to(ClientState::Closed);
        reset_binding(tcb);
        Err(Error::new(ErrorKind::TimedOut, "teardown timed out"))
    }

    /// Frees the TCB slot. Only legal in CLOSED.
    pub fn close(&self, sock: usize) -> Result<()> {
        let mut tcbs = self.ctx.tcbs.lock().unwrap();
        let slot = tcbs
            .get_mut(sock)
            .ok_or_else(no_socket)?;
        match slot {
            Some(tcb) if tcb.state == ClientState::Closed => {
                *slot = None;
                Ok(())
            }
            Some(_) => Err(illegal_state("close", "CLOSED")),
            None => Err(no_socket()),
        }
    }
}

impl ClientCtx {
    fn transmit(&self, node: NodeId, seg: Segment) {
        if self.tx.send((node, seg)).is_err() {
            tracing::error!(target: "snet/stcp", "sip channel gone, segment dropped");
        }
    }

    /// Opens the window on `sendbuf` and starts the retransmission timer
    /// when the buffer asks for one.
    fn pump(self: &Arc<Self>, sendbuf: &Arc<Mutex<SendBuffer>>) {
        let start_timer = sendbuf.lock().unwrap().send_window();
        if start_timer {
            let ctx = self.clone();
            let sendbuf = sendbuf.clone();
            tokio::spawn(async move {
                loop {
                    sleep(ctx.cfg.sendbuf_polling_interval).await;
                    let mut buf = sendbuf.lock().unwrap();
                    if buf.outstanding() == 0 {
                        buf.timer_stopped();
                        return;
                    }
                    if buf.head_age().is_some_and(|age| age >= ctx.cfg.data_timeout) {
                        tracing::debug!(
                            target: "snet/stcp",
                            "data timeout, retransmitting {} segments",
                            buf.outstanding(),
                        );
                        buf.retransmit_outstanding();
                    }
                }
            });
        }
    }
}

fn reset_binding(tcb: &mut ClientTcb) {
    tcb.peer_node = None;
    tcb.peer_port = 0;
    let mut buf = tcb.sendbuf.lock().unwrap();
    buf.clear();
    buf.reset_seq();
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
    ctx: Arc<ClientCtx>,
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

fn handle_segment(ctx: &Arc<ClientCtx>, src_node: NodeId, seg: Segment) {
    let mut ack_for = None;
    {
        let mut tcbs = ctx.tcbs.lock().unwrap();
        let Some(tcb) = tcbs
            .iter_mut()
            .flatten()
            .find(|tcb| tcb.local_port == seg.header.dest_port)
        else {
            tracing::warn!(
                target: "snet/stcp",
                "no socket bound to port {}, segment dropped", seg.header.dest_port,
            );
            return;
        };

        let from_peer =
            tcb.peer_node == Some(src_node) && tcb.peer_port == seg.header.src_port;
        match tcb.state {
            ClientState::Closed => {}
            ClientState::SynSent => {
                if seg.kind() == SegmentKind::SynAck && from_peer {
                    tcb.state.transition_to(ClientState::Connected);
                } else {
                    tracing::trace!(target: "snet/stcp", "ignoring {} in SYNSENT", seg.kind());
                }
            }
            ClientState::Connected => {
                if seg.kind() == SegmentKind::DataAck && from_peer {
                    tcb.sendbuf.lock().unwrap().recv_ack(seg.header.ack);
                    ack_for = Some(tcb.sendbuf.clone());
                } else {
                    tracing::trace!(target: "snet/stcp", "ignoring {} in CONNECTED", seg.kind());
                }
            }
            ClientState::FinWait => {
                if seg.kind() == SegmentKind::FinAck && from_peer {
                    tcb.state.transition_to(ClientState::Closed);
                } else {
                    tracing::trace!(target: "snet/stcp", "ignoring {} in FINWAIT", seg.kind());
                }
            }
        }
    }
    if let Some(sendbuf) = ack_for {
        ctx.pump(&sendbuf);
    }
}

fn tcb_ref<'a>(tcbs: &'a [Option<ClientTcb>], sock: usize) -> Result<&'a ClientTcb> {
    tcbs.get(sock).and_then(Option::as_ref).ok_or_else(no_socket)
}

fn tcb_mut<'a>(tcbs: &'a mut [Option<ClientTcb>], sock: usize) -> Result<&'a mut ClientTcb> {
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
