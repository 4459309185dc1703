//! Wire-format types shared by the STCP, SIP and SON layers.
//!
//! All records are serialized little-endian. The overlay only ever connects
//! homogeneous lab hosts, so no network byte order conversion is performed;
//! this assumption is fixed here in [`WIRE_ORDER`].

use bytestream::ByteOrder;

pub mod pkt;
pub mod seg;

pub use pkt::{PacketKind, RouteEntry, RouteUpdate, SipHeader, SipPacket};
pub use seg::{Segment, SegmentHeader, SegmentKind};

/// Byte order of every serialized record in the stack.
pub const WIRE_ORDER: ByteOrder = ByteOrder::LittleEndian;

/// Identifier of an overlay endpoint, derived from its hostname suffix.
pub type NodeId = i32;

/// Maximum payload carried by a single STCP segment.
pub const MAX_SEG_LEN: usize = 1464;

/// Pseudo node id instructing SON to replicate a packet to every neighbor.
pub const BROADCAST_NODEID: NodeId = 9999;

/// Routing cost treated as unreachable. Absorbing under path addition.
pub const INFINITE_COST: u32 = 999;
