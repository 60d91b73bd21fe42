//! Wire-format definitions for protocol segments.
//!
//! Every datagram exchanged between peers is a [`Segment`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (kind, sequence number, payload).
//! - Serialising a [`Segment`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Segment`], returning errors
//!   for malformed or truncated input.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |              Kind             |        Sequence Number        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                  Payload ... (DATA only, ≤ 1000)              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 4 bytes.

use thiserror::Error;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 4;

/// Largest payload a single DATA segment may carry.
///
/// Decoding does not enforce this; senders must when composing segments.
pub const MAX_PAYLOAD: usize = 1000;

const OFF_KIND: usize = 0;
const OFF_SEQNO: usize = 2;

/// The four segment kinds, with their on-wire codes.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    Data = 0,
    Ack = 1,
    Syn = 2,
    Fin = 3,
}

impl SegmentKind {
    pub fn from_u16(code: u16) -> Option<Self> {
        Some(match code {
            0 => SegmentKind::Data,
            1 => SegmentKind::Ack,
            2 => SegmentKind::Syn,
            3 => SegmentKind::Fin,
            _ => return None,
        })
    }

    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

impl std::fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SegmentKind::Data => "DATA",
            SegmentKind::Ack => "ACK",
            SegmentKind::Syn => "SYN",
            SegmentKind::Fin => "FIN",
        };
        f.write_str(name)
    }
}

/// A complete protocol datagram: kind + sequence number + payload bytes.
///
/// Only [`SegmentKind::Data`] segments carry a payload; the constructors
/// uphold this, and [`Segment::decode`] rejects control segments with
/// trailing bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    /// Byte offset of the first payload byte (DATA), or the sequence number
    /// consumed by this control segment (SYN/FIN), or the cumulative
    /// acknowledgement (ACK).
    pub seqno: u16,
    pub payload: Vec<u8>,
}

impl Segment {
    pub fn data(seqno: u16, payload: Vec<u8>) -> Self {
        debug_assert!(
            payload.len() <= MAX_PAYLOAD,
            "DATA payload of {} bytes exceeds MSS",
            payload.len()
        );
        Self {
            kind: SegmentKind::Data,
            seqno,
            payload,
        }
    }

    pub fn ack(seqno: u16) -> Self {
        Self::control(SegmentKind::Ack, seqno)
    }

    pub fn syn(seqno: u16) -> Self {
        Self::control(SegmentKind::Syn, seqno)
    }

    pub fn fin(seqno: u16) -> Self {
        Self::control(SegmentKind::Fin, seqno)
    }

    fn control(kind: SegmentKind, seqno: u16) -> Self {
        Self {
            kind,
            seqno,
            payload: Vec::new(),
        }
    }

    /// Number of sequence-space units this segment consumes.
    ///
    /// DATA consumes its payload length, SYN and FIN consume exactly one,
    /// ACK consumes nothing.
    pub fn sequence_len(&self) -> usize {
        match self.kind {
            SegmentKind::Data => self.payload.len(),
            SegmentKind::Syn | SegmentKind::Fin => 1,
            SegmentKind::Ack => 0,
        }
    }

    /// Serialise this segment into a newly allocated byte vector.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN + self.payload.len()];
        buf[OFF_KIND..OFF_KIND + 2].copy_from_slice(&self.kind.to_u16().to_be_bytes());
        buf[OFF_SEQNO..OFF_SEQNO + 2].copy_from_slice(&self.seqno.to_be_bytes());
        buf[HEADER_LEN..].copy_from_slice(&self.payload);
        buf
    }

    /// Parse a [`Segment`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`],
    /// - the kind code is not one of the four known kinds, or
    /// - a control segment carries payload bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort(buf.len()));
        }

        let code = u16::from_be_bytes([buf[OFF_KIND], buf[OFF_KIND + 1]]);
        let seqno = u16::from_be_bytes([buf[OFF_SEQNO], buf[OFF_SEQNO + 1]]);
        let kind = SegmentKind::from_u16(code).ok_or(PacketError::UnknownKind(code))?;

        let payload = &buf[HEADER_LEN..];
        if kind != SegmentKind::Data && !payload.is_empty() {
            return Err(PacketError::ControlWithPayload(kind));
        }

        Ok(Segment {
            kind,
            seqno,
            payload: payload.to_vec(),
        })
    }
}

/// Errors that can arise when parsing a raw datagram.
///
/// All variants are "malformed packet" conditions: the receiving side
/// discards the datagram without replying.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("malformed packet: {0} bytes is shorter than the header")]
    BufferTooShort(usize),
    #[error("malformed packet: unknown segment kind {0}")]
    UnknownKind(u16),
    #[error("malformed packet: {0} segment carries a payload")]
    ControlWithPayload(SegmentKind),
}
