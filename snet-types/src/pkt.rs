//! SIP packets and route-update records.

use std::{
    fmt::Display,
    io::{Error, ErrorKind, Read, Result, Write},
};

use bytestream::{StreamReader, StreamWriter};

use crate::{
    seg::{Segment, SEG_HEADER_LEN},
    NodeId, BROADCAST_NODEID, MAX_SEG_LEN, WIRE_ORDER,
};

/// Serialized size of a [`SipHeader`].
pub const SIP_HEADER_LEN: usize = 12;

/// Maximum payload of a SIP packet: a full segment plus its header.
pub const MAX_PKT_LEN: usize = MAX_SEG_LEN + SEG_HEADER_LEN;

/// The type discriminator of a [`SipPacket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PacketKind {
    RouteUpdate = 1,
    Sip = 2,
}

impl PacketKind {
    pub fn from_raw(raw: u16) -> Result<Self> {
        match raw {
            1 => Ok(Self::RouteUpdate),
            2 => Ok(Self::Sip),
            _ => Err(Error::new(
                ErrorKind::InvalidData,
                "unknown packet kind discriminant",
            )),
        }
    }

    pub fn to_raw(self) -> u16 {
        self as u16
    }
}

impl Display for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RouteUpdate => write!(f, "ROUTE_UPDATE"),
            Self::Sip => write!(f, "SIP"),
        }
    }
}

/// Header of a SIP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipHeader {
    pub src_node: NodeId,
    pub dest_node: NodeId,
    pub length: u16,
    pub kind: PacketKind,
}

/// A SIP protocol data unit, encapsulating either an STCP segment or a
/// route-update record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipPacket {
    pub header: SipHeader,
    pub payload: Vec<u8>,
}

impl StreamWriter for SipHeader {
    fn write_to<W: Write>(&self, buffer: &mut W, order: bytestream::ByteOrder) -> Result<()> {
        self.src_node.write_to(buffer, order)?;
        self.dest_node.write_to(buffer, order)?;
        self.length.write_to(buffer, order)?;
        self.kind.to_raw().write_to(buffer, order)?;
        Ok(())
    }
}

impl StreamReader for SipHeader {
    fn read_from<R: Read>(buffer: &mut R, order: bytestream::ByteOrder) -> Result<Self> {
        let src_node = NodeId::read_from(buffer, order)?;
        let dest_node = NodeId::read_from(buffer, order)?;
        let length = u16::read_from(buffer, order)?;
        let kind = PacketKind::from_raw(u16::read_from(buffer, order)?)?;
        if length as usize > MAX_PKT_LEN {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "packet length exceeds MAX_PKT_LEN",
            ));
        }
        Ok(Self {
            src_node,
            dest_node,
            length,
            kind,
        })
    }
}

impl StreamWriter for SipPacket {
    fn write_to<W: Write>(&self, buffer: &mut W, order: bytestream::ByteOrder) -> Result<()> {
        self.header.write_to(buffer, order)?;
        buffer.write_all(&self.payload)
    }
}

impl StreamReader for SipPacket {
    fn read_from<R: Read>(buffer: &mut R, order: bytestream::ByteOrder) -> Result<Self> {
        let header = SipHeader::read_from(buffer, order)?;
        let mut payload = vec![0; header.length as usize];
        buffer.read_exact(&mut payload)?;
        Ok(Self { header, payload })
    }
}

impl SipPacket {
    /// Wraps a transport segment for delivery to `dest_node`.
    pub fn encapsulate(src_node: NodeId, dest_node: NodeId, seg: &Segment) -> Result<Self> {
        let payload = seg.sealed_buffer()?;
        Ok(Self {
            header: SipHeader {
                src_node,
                dest_node,
                length: payload.len() as u16,
                kind: PacketKind::Sip,
            },
            payload,
        })
    }

    /// Wraps a distance vector for broadcast to all neighbors.
    pub fn route_update(src_node: NodeId, update: &RouteUpdate) -> Result<Self> {
        let payload = update.to_buffer()?;
        Ok(Self {
            header: SipHeader {
                src_node,
                dest_node: BROADCAST_NODEID,
                length: payload.len() as u16,
                kind: PacketKind::RouteUpdate,
            },
            payload,
        })
    }

    /// Parses the payload as a transport segment (`kind == Sip`).
    pub fn segment(&self) -> Result<Segment> {
        Segment::from_slice(&self.payload)
    }

    /// Parses the payload as a route-update record (`kind == RouteUpdate`).
    pub fn update(&self) -> Result<RouteUpdate> {
        RouteUpdate::from_slice(&self.payload)
    }

    pub fn to_buffer(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(SIP_HEADER_LEN + self.payload.len());
        self.write_to(&mut buf, WIRE_ORDER)?;
        Ok(buf)
    }

    pub fn from_slice(mut slice: &[u8]) -> Result<Self> {
        Self::read_from(&mut slice, WIRE_ORDER)
    }
}

/// One destination of a distance vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteEntry {
    pub node: NodeId,
    pub cost: u32,
}

/// A node's distance vector as carried by ROUTE_UPDATE packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteUpdate {
    pub entries: Vec<RouteEntry>,
}

impl StreamWriter for RouteUpdate {
    fn write_to<W: Write>(&self, buffer: &mut W, order: bytestream::ByteOrder) -> Result<()> {
        (self.entries.len() as u32).write_to(buffer, order)?;
        for entry in &self.entries {
            entry.node.write_to(buffer, order)?;
            entry.cost.write_to(buffer, order)?;
        }
        Ok(())
    }
}

impl StreamReader for RouteUpdate {
    fn read_from<R: Read>(buffer: &mut R, order: bytestream::ByteOrder) -> Result<Self> {
        let count = u32::read_from(buffer, order)?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let node = NodeId::read_from(buffer, order)?;
            let cost = u32::read_from(buffer, order)?;
            entries.push(RouteEntry { node, cost });
        }
        Ok(Self { entries })
    }
}

impl RouteUpdate {
    pub fn to_buffer(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(4 + self.entries.len() * 8);
        self.write_to(&mut buf, WIRE_ORDER)?;
        Ok(buf)
    }

    pub fn from_slice(mut slice: &[u8]) -> Result<Self> {
        Self::read_from(&mut slice, WIRE_ORDER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::INFINITE_COST;

    #[test]
    fn route_update_encoding() -> Result<()> {
        let update = RouteUpdate {
            entries: vec![
                RouteEntry { node: 1, cost: 0 },
                RouteEntry {
                    node: 3,
                    cost: INFINITE_COST,
                },
            ],
        };
        let buf = update.to_buffer()?;
        assert_eq!(
            buf,
            &[
                2, 0, 0, 0, // entry count
                1, 0, 0, 0, // node 1
                0, 0, 0, 0, // cost 0
                3, 0, 0, 0, // node 3
                0xe7, 0x03, 0, 0, // cost 999
            ]
        );
        assert_eq!(RouteUpdate::from_slice(&buf)?, update);
        Ok(())
    }

    #[test]
    fn packet_roundtrip_with_segment() -> Result<()> {
        let seg = Segment::data(87, 88, 12, b"hello\0".to_vec());
        let pkt = SipPacket::encapsulate(1, 4, &seg)?;
        assert_eq!(pkt.header.kind, PacketKind::Sip);
        assert_eq!(pkt.header.length as usize, SEG_HEADER_LEN + 6);

        let pkt2 = SipPacket::from_slice(&pkt.to_buffer()?)?;
        assert_eq!(pkt, pkt2);
        assert_eq!(pkt2.segment()?.payload, seg.payload);
        Ok(())
    }

    #[test]
    fn broadcast_update_roundtrip() -> Result<()> {
        let update = RouteUpdate {
            entries: (1..=4)
                .map(|n| RouteEntry {
                    node: n,
                    cost: n as u32,
                })
                .collect(),
        };
        let pkt = SipPacket::route_update(2, &update)?;
        assert_eq!(pkt.header.kind, PacketKind::RouteUpdate);
        assert_eq!(pkt.header.dest_node, BROADCAST_NODEID);
        assert_eq!(SipPacket::from_slice(&pkt.to_buffer()?)?.update()?, update);
        Ok(())
    }
}
