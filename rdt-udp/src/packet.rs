//! Wire-format definitions for protocol packets.
//!
//! Every datagram exchanged between initiator and responder is a [`Packet`].
//! This module is responsible for:
//! - Defining the fixed 8-byte header layout and the packet kinds.
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for truncated or inconsistent input.
//!
//! No I/O happens here.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | Type  |1 1 1 1|        Sequence Number        |  Ack Number   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  (ack cont.)  |          Window Size          |    Length     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 8 bytes.
//! type/reserved(1) + seq(2) + ack(2) + window(2) + length(1)

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 8;

/// Low nibble of byte 0; always written as all-ones, ignored on decode.
pub const RESERVED_BITS: u8 = 0x0F;

/// Receive window advertised in every outbound header, in bytes.
pub const ADVERTISED_WINDOW: u16 = 400;

/// Largest payload the 8-bit length field can describe.
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

// Byte offsets of each field within the serialised header.
const OFF_TYPE: usize = 0;
const OFF_SEQ: usize = 1;
const OFF_ACK: usize = 3;
const OFF_WINDOW: usize = 5;
const OFF_LENGTH: usize = 7;

/// The 4-bit packet kind carried in the high nibble of byte 0.
///
/// Nibble values without an assigned meaning decode to
/// [`PacketType::Unknown`] so that every header round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Connection request (handshake step 1).
    Syn,
    /// Connection confirmation (handshake step 2).
    SynAck,
    /// Payload-bearing segment.
    Data,
    /// Cumulative acknowledgement; also handshake step 3.
    Ack,
    /// Teardown request, and the responder's reply to it.
    Fin,
    /// Responder → initiator: one byte of simulated drop-rate percentage.
    Config,
    /// Any other nibble value.
    Unknown(u8),
}

impl PacketType {
    /// Map the high nibble of byte 0 to a packet kind.
    pub fn from_nibble(nibble: u8) -> Self {
        match nibble & 0x0F {
            1 => Self::Syn,
            2 => Self::SynAck,
            3 => Self::Data,
            4 => Self::Ack,
            5 => Self::Fin,
            6 => Self::Config,
            other => Self::Unknown(other),
        }
    }

    /// The 4-bit wire value of this kind.
    pub fn to_nibble(self) -> u8 {
        match self {
            Self::Syn => 1,
            Self::SynAck => 2,
            Self::Data => 3,
            Self::Ack => 4,
            Self::Fin => 5,
            Self::Config => 6,
            Self::Unknown(n) => n & 0x0F,
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syn => write!(f, "SYN"),
            Self::SynAck => write!(f, "SYN-ACK"),
            Self::Data => write!(f, "DATA"),
            Self::Ack => write!(f, "ACK"),
            Self::Fin => write!(f, "FIN"),
            Self::Config => write!(f, "CONFIG"),
            Self::Unknown(n) => write!(f, "UNKNOWN({n})"),
        }
    }
}

/// Fixed-size protocol header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub ptype: PacketType,
    /// Packet sequence number (wraps at 65536).
    pub seq: u16,
    /// Cumulative acknowledgement: the next sequence number expected.
    pub ack: u16,
    /// Advertised receive window in bytes.
    pub window: u16,
    /// Number of payload bytes following the header.
    pub length: u8,
}

impl Header {
    pub fn new(ptype: PacketType, seq: u16, ack: u16, window: u16, length: u8) -> Self {
        Self {
            ptype,
            seq,
            ack,
            window,
            length,
        }
    }

    /// Serialise into the 8-byte on-wire representation.
    ///
    /// The reserved nibble is always written as [`RESERVED_BITS`].
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[OFF_TYPE] = (self.ptype.to_nibble() << 4) | RESERVED_BITS;
        buf[OFF_SEQ..OFF_SEQ + 2].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 2].copy_from_slice(&self.ack.to_be_bytes());
        buf[OFF_WINDOW..OFF_WINDOW + 2].copy_from_slice(&self.window.to_be_bytes());
        buf[OFF_LENGTH] = self.length;
        buf
    }

    /// Parse the first [`HEADER_LEN`] bytes of `buf`.
    ///
    /// Bytes beyond the header are ignored; the packet type is recovered by
    /// shifting, so whatever the peer put in the reserved nibble is irrelevant.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort(buf.len()));
        }

        Ok(Self {
            ptype: PacketType::from_nibble(buf[OFF_TYPE] >> 4),
            seq: u16::from_be_bytes([buf[OFF_SEQ], buf[OFF_SEQ + 1]]),
            ack: u16::from_be_bytes([buf[OFF_ACK], buf[OFF_ACK + 1]]),
            window: u16::from_be_bytes([buf[OFF_WINDOW], buf[OFF_WINDOW + 1]]),
            length: buf[OFF_LENGTH],
        })
    }
}

/// A complete protocol datagram: header + payload bytes.
///
/// Build packets through the typed constructors ([`Packet::syn`],
/// [`Packet::data`], ...) so that `header.length` always matches the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a packet of any kind, deriving `length` from `payload`.
    pub fn new(ptype: PacketType, seq: u16, ack: u16, payload: Vec<u8>) -> Result<Self, PacketError> {
        let length =
            u8::try_from(payload.len()).map_err(|_| PacketError::PayloadTooLong(payload.len()))?;
        Ok(Self {
            header: Header::new(ptype, seq, ack, ADVERTISED_WINDOW, length),
            payload,
        })
    }

    fn control(ptype: PacketType, seq: u16, ack: u16) -> Self {
        Self {
            header: Header::new(ptype, seq, ack, ADVERTISED_WINDOW, 0),
            payload: Vec::new(),
        }
    }

    /// Handshake step 1, carrying the initiator's ISN.
    pub fn syn(seq: u16) -> Self {
        Self::control(PacketType::Syn, seq, 0)
    }

    /// Handshake step 2: `ack` must be the initiator's ISN + 1.
    pub fn syn_ack(seq: u16, ack: u16) -> Self {
        Self::control(PacketType::SynAck, seq, ack)
    }

    /// A bare acknowledgement (handshake step 3).
    pub fn ack(seq: u16, ack: u16) -> Self {
        Self::control(PacketType::Ack, seq, ack)
    }

    /// A cumulative ACK carrying the responder's wall-clock time in
    /// milliseconds since the Unix epoch, for diagnostics.
    pub fn timestamped_ack(ack: u16) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let payload = millis.to_be_bytes().to_vec();
        Self {
            header: Header::new(PacketType::Ack, 0, ack, ADVERTISED_WINDOW, payload.len() as u8),
            payload,
        }
    }

    /// Teardown request (initiator) or its acknowledgement (responder).
    pub fn fin(seq: u16, ack: u16) -> Self {
        Self::control(PacketType::Fin, seq, ack)
    }

    /// A data segment. Fails if `chunk` cannot be described by the length field.
    pub fn data(seq: u16, chunk: Vec<u8>) -> Result<Self, PacketError> {
        Self::new(PacketType::Data, seq, 0, chunk)
    }

    /// Responder's post-handshake notice of its simulated drop rate.
    ///
    /// Percentages above 100 are clamped.
    pub fn config(drop_percent: u8) -> Self {
        Self {
            header: Header::new(PacketType::Config, 0, 0, ADVERTISED_WINDOW, 1),
            payload: vec![drop_percent.min(100)],
        }
    }

    /// Override the advertised window of an already-built packet.
    pub fn with_window(mut self, window: u16) -> Self {
        self.header.window = window;
        self
    }

    /// The drop-rate percentage of a CONFIG packet, `None` for anything else.
    pub fn drop_percent(&self) -> Option<u8> {
        match self.header.ptype {
            PacketType::Config => self.payload.first().copied(),
            _ => None,
        }
    }

    /// The responder timestamp carried by an ACK, if present.
    pub fn ack_timestamp_millis(&self) -> Option<u64> {
        if self.header.ptype != PacketType::Ack {
            return None;
        }
        let bytes: [u8; 8] = self.payload.as_slice().try_into().ok()?;
        Some(u64::from_be_bytes(bytes))
    }

    /// Serialise this packet into a newly allocated byte vector.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a [`Packet`] from a raw datagram.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`], or
    /// - the `length` field disagrees with the bytes that follow the header.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        let header = Header::decode(buf)?;
        let payload = &buf[HEADER_LEN..];
        if payload.len() != header.length as usize {
            return Err(PacketError::LengthMismatch {
                declared: header.length,
                actual: payload.len(),
            });
        }
        Ok(Self {
            header,
            payload: payload.to_vec(),
        })
    }
}

/// Errors that can arise when building or parsing a datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    #[error("malformed header: {0} bytes is shorter than the {HEADER_LEN}-byte header")]
    BufferTooShort(usize),
    /// `length` field does not match the actual trailing bytes.
    #[error("length field declares {declared} payload bytes but {actual} follow the header")]
    LengthMismatch { declared: u8, actual: usize },
    /// Payload does not fit in the 8-bit length field.
    #[error("payload of {0} bytes exceeds the {MAX_PAYLOAD}-byte limit")]
    PayloadTooLong(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_encode_decode_roundtrip() {
        let h = Header::new(PacketType::Data, 513, 1027, 400, 80);
        assert_eq!(Header::decode(&h.encode()).unwrap(), h);
    }

    #[test]
    fn reserved_nibble_is_all_ones() {
        let bytes = Header::new(PacketType::SynAck, 0, 0, 0, 0).encode();
        assert_eq!(bytes[OFF_TYPE], 0x2F);
    }

    #[test]
    fn decode_ignores_reserved_nibble() {
        let mut bytes = Header::new(PacketType::Fin, 7, 8, 400, 0).encode();
        bytes[OFF_TYPE] = 0x50;
        let h = Header::decode(&bytes).unwrap();
        assert_eq!(h.ptype, PacketType::Fin);
        assert_eq!(h.seq, 7);
    }

    #[test]
    fn fields_big_endian_on_wire() {
        let bytes = Header::new(PacketType::Ack, 0x0102, 0x0304, 0x0506, 0x07).encode();
        assert_eq!(bytes, [0x4F, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07]);
    }

    #[test]
    fn decode_empty_buffer_returns_error() {
        assert_eq!(Header::decode(&[]), Err(PacketError::BufferTooShort(0)));
    }

    #[test]
    fn decode_short_header_returns_error() {
        assert_eq!(
            Packet::decode(&[0x3F; HEADER_LEN - 1]),
            Err(PacketError::BufferTooShort(HEADER_LEN - 1))
        );
    }

    #[test]
    fn decode_truncated_payload_returns_error() {
        let mut bytes = Packet::data(0, b"data".to_vec()).unwrap().encode();
        bytes.pop();
        assert_eq!(
            Packet::decode(&bytes),
            Err(PacketError::LengthMismatch {
                declared: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn data_packet_length_matches_payload() {
        let pkt = Packet::data(3, vec![0xAB; 61]).unwrap();
        assert_eq!(pkt.header.length, 61);
        let decoded = Packet::decode(&pkt.encode()).unwrap();
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn oversized_payload_rejected() {
        assert_eq!(
            Packet::data(0, vec![0; 256]),
            Err(PacketError::PayloadTooLong(256))
        );
    }

    #[test]
    fn config_packet_carries_drop_percent() {
        let pkt = Packet::config(30);
        assert_eq!(pkt.encode().len(), HEADER_LEN + 1);
        let decoded = Packet::decode(&pkt.encode()).unwrap();
        assert_eq!(decoded.header.ptype, PacketType::Config);
        assert_eq!(decoded.drop_percent(), Some(30));
        assert_eq!(Packet::config(250).drop_percent(), Some(100));
    }

    #[test]
    fn timestamped_ack_roundtrip() {
        let pkt = Packet::timestamped_ack(5);
        let decoded = Packet::decode(&pkt.encode()).unwrap();
        assert_eq!(decoded.header.ack, 5);
        assert!(decoded.ack_timestamp_millis().unwrap() > 0);
        assert_eq!(Packet::ack(0, 5).ack_timestamp_millis(), None);
    }

    #[test]
    fn unknown_nibble_survives_roundtrip() {
        let h = Header::new(PacketType::Unknown(0), 1, 2, 3, 4);
        assert_eq!(Header::decode(&h.encode()).unwrap().ptype, PacketType::Unknown(0));
        assert_eq!(PacketType::from_nibble(15), PacketType::Unknown(15));
    }
}
