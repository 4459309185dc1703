//! STCP segments and their checksum.

use std::{
    fmt::Display,
    io::{Error, ErrorKind, Read, Result, Write},
};

use bytestream::{StreamReader, StreamWriter};

use crate::MAX_SEG_LEN;

/// Serialized size of a [`SegmentHeader`].
pub const SEG_HEADER_LEN: usize = 24;

/// Byte offset of the checksum field within a serialized header.
pub const CHECKSUM_OFFSET: usize = 22;

/// The type discriminator of a [`Segment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum SegmentKind {
    Syn = 0,
    SynAck = 1,
    Fin = 2,
    FinAck = 3,
    Data = 4,
    DataAck = 5,
}

impl SegmentKind {
    pub fn from_raw(raw: u16) -> Result<Self> {
        match raw {
            0 => Ok(Self::Syn),
            1 => Ok(Self::SynAck),
            2 => Ok(Self::Fin),
            3 => Ok(Self::FinAck),
            4 => Ok(Self::Data),
            5 => Ok(Self::DataAck),
            _ => Err(Error::new(
                ErrorKind::InvalidData,
                "unknown segment kind discriminant",
            )),
        }
    }

    pub fn to_raw(self) -> u16 {
        self as u16
    }
}

impl Display for SegmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Syn => write!(f, "SYN"),
            Self::SynAck => write!(f, "SYNACK"),
            Self::Fin => write!(f, "FIN"),
            Self::FinAck => write!(f, "FINACK"),
            Self::Data => write!(f, "DATA"),
            Self::DataAck => write!(f, "DATAACK"),
        }
    }
}

/// Header of an STCP segment.
///
/// `rcv_win` is reserved on the wire and always zero; receivers never
/// interpret it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentHeader {
    pub src_port: u32,
    pub dest_port: u32,
    pub seq: u32,
    pub ack: u32,
    pub length: u16,
    pub kind: SegmentKind,
    pub rcv_win: u16,
    pub checksum: u16,
}

/// An STCP protocol data unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: SegmentHeader,
    pub payload: Vec<u8>,
}

impl StreamWriter for SegmentHeader {
    fn write_to<W: Write>(&self, buffer: &mut W, order: bytestream::ByteOrder) -> Result<()> {
        self.src_port.write_to(buffer, order)?;
        self.dest_port.write_to(buffer, order)?;
        self.seq.write_to(buffer, order)?;
        self.ack.write_to(buffer, order)?;
        self.length.write_to(buffer, order)?;
        self.kind.to_raw().write_to(buffer, order)?;
        self.rcv_win.write_to(buffer, order)?;
        self.checksum.write_to(buffer, order)?;
        Ok(())
    }
}

impl StreamReader for SegmentHeader {
    fn read_from<R: Read>(buffer: &mut R, order: bytestream::ByteOrder) -> Result<Self> {
        let src_port = u32::read_from(buffer, order)?;
        let dest_port = u32::read_from(buffer, order)?;
        let seq = u32::read_from(buffer, order)?;
        let ack = u32::read_from(buffer, order)?;
        let length = u16::read_from(buffer, order)?;
        let kind = SegmentKind::from_raw(u16::read_from(buffer, order)?)?;
        let rcv_win = u16::read_from(buffer, order)?;
        let checksum = u16::read_from(buffer, order)?;
        if length as usize > MAX_SEG_LEN {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "segment length exceeds MAX_SEG_LEN",
            ));
        }
        Ok(Self {
            src_port,
            dest_port,
            seq,
            ack,
            length,
            kind,
            rcv_win,
            checksum,
        })
    }
}

impl StreamWriter for Segment {
    fn write_to<W: Write>(&self, buffer: &mut W, order: bytestream::ByteOrder) -> Result<()> {
        self.header.write_to(buffer, order)?;
        buffer.write_all(&self.payload)
    }
}

impl StreamReader for Segment {
    fn read_from<R: Read>(buffer: &mut R, order: bytestream::ByteOrder) -> Result<Self> {
        let header = SegmentHeader::read_from(buffer, order)?;
        let mut payload = vec![0; header.length as usize];
        buffer.read_exact(&mut payload)?;
        Ok(Self { header, payload })
    }
}

impl Segment {
    fn control(kind: SegmentKind, src_port: u32, dest_port: u32, ack: u32) -> Self {
        Self {
            header: SegmentHeader {
                src_port,
                dest_port,
                seq: 0,
                ack,
                length: 0,
                kind,
                rcv_win: 0,
                checksum: 0,
            },
            payload: Vec::new(),
        }
    }

    pub fn syn(src_port: u32, dest_port: u32) -> Self {
        Self::control(SegmentKind::Syn, src_port, dest_port, 0)
    }

    pub fn synack(src_port: u32, dest_port: u32, ack: u32) -> Self {
        Self::control(SegmentKind::SynAck, src_port, dest_port, ack)
    }

    pub fn fin(src_port: u32, dest_port: u32) -> Self {
        Self::control(SegmentKind::Fin, src_port, dest_port, 0)
    }

    pub fn finack(src_port: u32, dest_port: u32, ack: u32) -> Self {
        Self::control(SegmentKind::FinAck, src_port, dest_port, ack)
    }

    pub fn dataack(src_port: u32, dest_port: u32, ack: u32) -> Self {
        Self::control(SegmentKind::DataAck, src_port, dest_port, ack)
    }

    /// Builds a DATA segment. `payload` must not exceed [`MAX_SEG_LEN`].
    pub fn data(src_port: u32, dest_port: u32, seq: u32, payload: Vec<u8>) -> Self {
        debug_assert!(payload.len() <= MAX_SEG_LEN);
        Self {
            header: SegmentHeader {
                src_port,
                dest_port,
                seq,
                ack: 0,
                length: payload.len() as u16,
                kind: SegmentKind::Data,
                rcv_win: 0,
                checksum: 0,
            },
            payload,
        }
    }

    pub fn kind(&self) -> SegmentKind {
        self.header.kind
    }

    /// Serialized size of the whole segment.
    pub fn wire_len(&self) -> usize {
        SEG_HEADER_LEN + self.payload.len()
    }

    pub fn to_buffer(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.wire_len());
        self.write_to(&mut buf, crate::WIRE_ORDER)?;
        Ok(buf)
    }

    pub fn from_slice(mut slice: &[u8]) -> Result<Self> {
        Self::read_from(&mut slice, crate::WIRE_ORDER)
    }

    /// Serializes the segment with a freshly computed checksum.
    pub fn sealed_buffer(&self) -> Result<Vec<u8>> {
        let mut buf = self.to_buffer()?;
        buf[CHECKSUM_OFFSET] = 0;
        buf[CHECKSUM_OFFSET + 1] = 0;
        let sum = !ones_complement_sum(&buf);
        buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&sum.to_le_bytes());
        Ok(buf)
    }
}

/// Folded 16-bit one's-complement sum over `bytes`, read as little-endian
/// words. An odd tail byte is padded with a zero high byte.
fn ones_complement_sum(bytes: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = bytes.chunks_exact(2);
    for word in &mut words {
        sum += u32::from(u16::from_le_bytes([word[0], word[1]]));
    }
    if let [last] = words.remainder() {
        sum += u32::from(u16::from_le_bytes([*last, 0]));
    }
    while sum >> 16 != 0 {
        sum = (sum >> 16) + (sum & 0xffff);
    }
    sum as u16
}

/// Checks the checksum of a raw serialized segment.
///
/// Holds iff the record is unmodified since [`Segment::sealed_buffer`]
/// stamped it.
pub fn checksum_ok(raw: &[u8]) -> bool {
    ones_complement_sum(raw) == 0xffff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_encoding() -> Result<()> {
        let seg = Segment::data(87, 88, 0x0102, vec![0xaa, 0xbb]);
        let buf = seg.to_buffer()?;
        assert_eq!(
            buf,
            &[
                87, 0, 0, 0, // src_port
                88, 0, 0, 0, // dest_port
                0x02, 0x01, 0, 0, // seq
                0, 0, 0, 0, // ack
                2, 0, // length
                4, 0, // kind = DATA
                0, 0, // rcv_win
                0, 0, // checksum (unsealed)
                0xaa, 0xbb, // payload
            ]
        );
        Ok(())
    }

    #[test]
    fn segment_roundtrip() -> Result<()> {
        let seg = Segment::data(10, 20, 4000, (0..200u8).collect());
        let seg2 = Segment::from_slice(&seg.to_buffer()?)?;
        assert_eq!(seg, seg2);
        Ok(())
    }

    #[test]
    fn checksum_roundtrip() -> Result<()> {
        let seg = Segment::data(1, 2, 3, b"hello world".to_vec());
        let sealed = seg.sealed_buffer()?;
        assert!(checksum_ok(&sealed));

        let parsed = Segment::from_slice(&sealed)?;
        assert_eq!(parsed.payload, seg.payload);
        Ok(())
    }

    #[test]
    fn checksum_detects_any_single_bit_flip() -> Result<()> {
        let seg = Segment::data(1, 2, 3, b"abc".to_vec());
        let sealed = seg.sealed_buffer()?;
        for bit in 0..sealed.len() * 8 {
            let mut flipped = sealed.clone();
            flipped[bit / 8] ^= 1 << (bit % 8);
            assert!(!checksum_ok(&flipped), "flip of bit {bit} went undetected");
        }
        Ok(())
    }

    #[test]
    fn checksum_pads_odd_length_with_zero() -> Result<()> {
        // A segment with odd payload length must checksum identically to the
        // same bytes with an explicit zero pad byte.
        let seg = Segment::data(1, 2, 3, b"xyzzy".to_vec());
        let mut sealed = seg.sealed_buffer()?;
        assert_eq!(sealed.len() % 2, 1);
        let odd = ones_complement_sum(&sealed);
        sealed.push(0);
        assert_eq!(odd, ones_complement_sum(&sealed));
        Ok(())
    }

    #[test]
    fn max_payload_fits_one_segment() -> Result<()> {
        let seg = Segment::data(1, 2, 0, vec![0x5a; MAX_SEG_LEN]);
        let buf = seg.to_buffer()?;
        assert_eq!(buf.len(), SEG_HEADER_LEN + MAX_SEG_LEN);
        assert_eq!(Segment::from_slice(&buf)?, seg);
        Ok(())
    }

    #[test]
    fn oversized_length_field_rejected() {
        let mut buf = Segment::data(1, 2, 0, vec![0; 4]).to_buffer().unwrap();
        // length field at offset 16
        buf[16..18].copy_from_slice(&((MAX_SEG_LEN as u16) + 1).to_le_bytes());
        assert!(Segment::from_slice(&buf).is_err());
    }
}
