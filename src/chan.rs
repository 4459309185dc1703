//! Typed record channels between adjacent processes.
//!
//! STCP and SIP exchange `(node id, segment)` tuples; SIP and SON exchange
//! packets, prefixed with a next-hop node id in the SIP→SON direction.
//! Overlay links between SON processes carry bare packets. Every record is
//! framed per [`crate::framing`].
//!
//! Segment receive paths optionally run the loss injector: a configurable
//! fraction of records is dropped outright or has a random bit flipped, in
//! which case the checksum rejects the record. Both cases surface as a
//! silent discard (`Ok(None)`), which Go-Back-N recovers from.

use std::io::Result;

use bytes::{BufMut, BytesMut};
use bytestream::{StreamReader, StreamWriter};
use rand::Rng;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use snet_types::{
    pkt::SIP_HEADER_LEN,
    seg::{checksum_ok, SEG_HEADER_LEN},
    NodeId, Segment, SegmentHeader, SipHeader, SipPacket, WIRE_ORDER,
};

use crate::framing::{read_trailer, sync_to_frame, write_frame};

/// Simulates overlay data loss on a raw received record.
#[derive(Debug, Clone, Copy)]
struct LossSim {
    rate: f64,
}

impl LossSim {
    /// Returns `true` when the record is to be dropped. Otherwise the record
    /// may have had a single bit flipped in place.
    fn apply(&self, raw: &mut [u8]) -> bool {
        let mut rng = rand::thread_rng();
        if rng.gen::<f64>() >= self.rate {
            return false;
        }
        if rng.gen::<bool>() {
            true
        } else {
            let bit = rng.gen_range(0..raw.len() * 8);
            raw[bit / 8] ^= 1 << (bit % 8);
            false
        }
    }
}

/// Write side of a segment tuple channel.
#[derive(Debug)]
pub struct SegSink<W> {
    w: W,
}

impl<W: AsyncWrite + Unpin> SegSink<W> {
    pub fn new(w: W) -> Self {
        Self { w }
    }

    /// Sends one `(node, segment)` tuple, stamping the segment checksum.
    pub async fn send(&mut self, node: NodeId, seg: &Segment) -> Result<()> {
        let sealed = seg.sealed_buffer()?;
        let mut record = BytesMut::with_capacity(4 + sealed.len());
        record.put_i32_le(node);
        record.put_slice(&sealed);
        write_frame(&mut self.w, &record).await?;
        tracing::trace!(
            target: "snet/chan",
            "seg[{}] sent: {} bytes [port {} -> {} | seq {}]",
            seg.kind(),
            seg.header.length,
            seg.header.src_port,
            seg.header.dest_port,
            seg.header.seq,
        );
        Ok(())
    }
}

/// Read side of a segment tuple channel, with optional loss injection.
#[derive(Debug)]
pub struct SegStream<R> {
    r: R,
    loss: Option<LossSim>,
}

impl<R: AsyncRead + Unpin> SegStream<R> {
    /// A `loss_rate` of zero disables the injector entirely.
    pub fn new(r: R, loss_rate: f64) -> Self {
        let loss = (loss_rate > 0.0).then_some(LossSim { rate: loss_rate });
        Self { r, loss }
    }

    /// Receives the next tuple. `Ok(None)` means a record arrived but was
    /// discarded (simulated loss, corruption, or a framing mismatch); the
    /// caller is expected to simply continue. `Err` means the channel closed.
    pub async fn recv(&mut self) -> Result<Option<(NodeId, Segment)>> {
        sync_to_frame(&mut self.r).await?;

        let mut id = [0u8; 4];
        self.r.read_exact(&mut id).await?;
        let node = NodeId::from_le_bytes(id);

        let mut raw = vec![0u8; SEG_HEADER_LEN];
        self.r.read_exact(&mut raw).await?;
        let header = match SegmentHeader::read_from(&mut &raw[..], WIRE_ORDER) {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!(target: "snet/chan", "unparseable segment header, resyncing: {e}");
                return Ok(None);
            }
        };

        raw.resize(SEG_HEADER_LEN + header.length as usize, 0);
        self.r.read_exact(&mut raw[SEG_HEADER_LEN..]).await?;

        if !read_trailer(&mut self.r).await? {
            tracing::warn!(target: "snet/chan", "missing segment frame trailer, resyncing");
            return Ok(None);
        }

        if let Some(loss) = self.loss {
            if loss.apply(&mut raw) {
                tracing::debug!(
                    target: "snet/chan",
                    "seg[{}] lost: {} bytes [seq {}]",
                    header.kind, header.length, header.seq,
                );
                return Ok(None);
            }
        }

        if !checksum_ok(&raw) {
            tracing::debug!(
                target: "snet/chan",
                "seg[{}] checksum mismatch: {} bytes [seq {}]",
                header.kind, header.length, header.seq,
            );
            return Ok(None);
        }

        match Segment::from_slice(&raw) {
            Ok(seg) => {
                tracing::trace!(
                    target: "snet/chan",
                    "seg[{}] recv: {} bytes [port {} -> {} | seq {}]",
                    seg.kind(),
                    seg.header.length,
                    seg.header.src_port,
                    seg.header.dest_port,
                    seg.header.seq,
                );
                Ok(Some((node, seg)))
            }
            Err(e) => {
                tracing::warn!(target: "snet/chan", "unparseable segment discarded: {e}");
                Ok(None)
            }
        }
    }
}

/// Write side of a packet channel.
#[derive(Debug)]
pub struct PktSink<W> {
    w: W,
}

impl<W: AsyncWrite + Unpin> PktSink<W> {
    pub fn new(w: W) -> Self {
        Self { w }
    }

    /// Sends a bare packet (SON→SIP delivery and overlay links).
    pub async fn send(&mut self, pkt: &SipPacket) -> Result<()> {
        let record = pkt.to_buffer()?;
        write_frame(&mut self.w, &record).await?;
        trace_pkt("sent", pkt);
        Ok(())
    }

    /// Sends a `(next hop, packet)` tuple (SIP→SON).
    pub async fn send_routed(&mut self, next_hop: NodeId, pkt: &SipPacket) -> Result<()> {
        let body = pkt.to_buffer()?;
        let mut record = BytesMut::with_capacity(4 + body.len());
        record.put_i32_le(next_hop);
        record.put_slice(&body);
        write_frame(&mut self.w, &record).await?;
        trace_pkt("sent", pkt);
        Ok(())
    }
}

/// Read side of a packet channel.
#[derive(Debug)]
pub struct PktStream<R> {
    r: R,
}

impl<R: AsyncRead + Unpin> PktStream<R> {
    pub fn new(r: R) -> Self {
        Self { r }
    }

    /// Receives a bare packet. `Ok(None)` means a malformed record was
    /// discarded; `Err` means the channel closed.
    pub async fn recv(&mut self) -> Result<Option<SipPacket>> {
        sync_to_frame(&mut self.r).await?;
        self.read_packet().await
    }

    /// Receives a `(next hop, packet)` tuple (SON side of the SIP stream).
    pub async fn recv_routed(&mut self) -> Result<Option<(NodeId, SipPacket)>> {
        sync_to_frame(&mut self.r).await?;

        let mut id = [0u8; 4];
        self.r.read_exact(&mut id).await?;
        let next_hop = NodeId::from_le_bytes(id);

        Ok(self.read_packet().await?.map(|pkt| (next_hop, pkt)))
    }

    async fn read_packet(&mut self) -> Result<Option<SipPacket>> {
        let mut raw = vec![0u8; SIP_HEADER_LEN];
        self.r.read_exact(&mut raw).await?;
        let header = match SipHeader::read_from(&mut &raw[..], WIRE_ORDER) {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!(target: "snet/chan", "unparseable packet header, resyncing: {e}");
                return Ok(None);
            }
        };

        let mut payload = vec![0u8; header.length as usize];
        self.r.read_exact(&mut payload).await?;

        if !read_trailer(&mut self.r).await? {
            tracing::warn!(target: "snet/chan", "missing packet frame trailer, resyncing");
            return Ok(None);
        }

        let pkt = SipPacket { header, payload };
        trace_pkt("recv", &pkt);
        Ok(Some(pkt))
    }
}

fn trace_pkt(verb: &str, pkt: &SipPacket) {
    tracing::trace!(
        target: "snet/chan",
        "pkt[{}] {verb}: {} bytes [node {} -> {}]",
        pkt.header.kind,
        pkt.header.length,
        pkt.header.src_node,
        pkt.header.dest_node,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use snet_types::{PacketKind, RouteEntry, RouteUpdate, BROADCAST_NODEID};

    #[tokio::test]
    async fn seg_tuple_roundtrip() -> Result<()> {
        let (tx, rx) = tokio::io::duplex(4096);
        let mut sink = SegSink::new(tx);
        let mut stream = SegStream::new(rx, 0.0);

        let seg = Segment::data(87, 88, 6, b"hello\0".to_vec());
        sink.send(2, &seg).await?;

        let (node, recvd) = stream.recv().await?.expect("segment discarded");
        assert_eq!(node, 2);
        assert_eq!(recvd.payload, seg.payload);
        assert_eq!(recvd.header.seq, 6);
        Ok(())
    }

    #[tokio::test]
    async fn corrupted_record_is_discarded() -> Result<()> {
        let (mut tx, rx) = tokio::io::duplex(4096);
        let mut stream = SegStream::new(rx, 0.0);

        // A sealed record with one bit flipped on the wire.
        let seg = Segment::data(1, 2, 0, b"abcd".to_vec());
        let mut record = BytesMut::new();
        record.put_i32_le(9);
        let mut sealed = seg.sealed_buffer()?;
        sealed[24] ^= 0x10;
        record.put_slice(&sealed);
        write_frame(&mut tx, &record).await?;

        assert!(stream.recv().await?.is_none());

        // The stream stays usable for the next well-formed record.
        let mut sink = SegSink::new(tx);
        sink.send(9, &seg).await?;
        assert!(stream.recv().await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn total_loss_discards_every_record() -> Result<()> {
        let (tx, rx) = tokio::io::duplex(4096);
        let mut sink = SegSink::new(tx);
        let mut stream = SegStream::new(rx, 1.0);

        for _ in 0..16 {
            sink.send(1, &Segment::data(1, 2, 0, b"x".to_vec())).await?;
            assert!(stream.recv().await?.is_none());
        }
        Ok(())
    }

    #[tokio::test]
    async fn routed_pkt_tuple_roundtrip() -> Result<()> {
        let (tx, rx) = tokio::io::duplex(4096);
        let mut sink = PktSink::new(tx);
        let mut stream = PktStream::new(rx);

        let update = RouteUpdate {
            entries: vec![RouteEntry { node: 1, cost: 3 }],
        };
        let pkt = SipPacket::route_update(1, &update)?;
        sink.send_routed(BROADCAST_NODEID, &pkt).await?;

        let (next_hop, recvd) = stream.recv_routed().await?.expect("packet discarded");
        assert_eq!(next_hop, BROADCAST_NODEID);
        assert_eq!(recvd.header.kind, PacketKind::RouteUpdate);
        assert_eq!(recvd.update()?, update);
        Ok(())
    }
}
