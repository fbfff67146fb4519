use bytes::Bytes;
use thiserror::Error;

use crate::seq::SeqNum;

/// Segment header flags. Each flag travels as its own byte on the wire.
pub mod flags {
    pub const SYN: u8 = 0x01;
    pub const FIN: u8 = 0x02;
    pub const ACK: u8 = 0x04;
    pub const DUPACK: u8 = 0x08;
}

/// Fixed header size: seq(2) + ack(2) + syn/fin/ack/dupack(4) + length(4).
pub const HEADER_LEN: usize = 12;
/// Payload area carried by every datagram, used or not.
pub const PAYLOAD_LEN: usize = 512;
/// Every datagram on the wire is exactly this long.
pub const PACKET_LEN: usize = HEADER_LEN + PAYLOAD_LEN;

const OFF_SEQ: usize = 0;
const OFF_ACK: usize = 2;
const OFF_SYN: usize = 4;
const OFF_FIN: usize = 5;
const OFF_ACK_FLAG: usize = 6;
const OFF_DUPACK: usize = 7;
const OFF_LENGTH: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("datagram is {0} bytes, expected {PACKET_LEN}")]
    WrongSize(usize),
    #[error("length field {0} exceeds the {PAYLOAD_LEN}-byte payload area")]
    LengthOutOfRange(u32),
    #[error("sequence field {0} is outside the sequence space")]
    SeqOutOfRange(u16),
    #[error("payload of {0} bytes does not fit in one segment")]
    PayloadTooLarge(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentHeader {
    pub seq_num: SeqNum,
    pub ack_num: SeqNum,
    pub flags: u8,
}

impl SegmentHeader {
    pub fn new(seq: SeqNum, ack: SeqNum, flags: u8) -> Self {
        Self {
            seq_num: seq,
            ack_num: ack,
            flags,
        }
    }

    pub fn is_syn(&self) -> bool {
        self.flags & flags::SYN != 0
    }
    pub fn is_fin(&self) -> bool {
        self.flags & flags::FIN != 0
    }
    pub fn is_ack(&self) -> bool {
        self.flags & flags::ACK != 0
    }
    pub fn is_dupack(&self) -> bool {
        self.flags & flags::DUPACK != 0
    }

    /// True for either flavour of acknowledgment.
    pub fn acknowledges(&self) -> bool {
        self.flags & (flags::ACK | flags::DUPACK) != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: SegmentHeader,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(seq: SeqNum, ack: SeqNum, flags: u8, payload: Bytes) -> Result<Self, PacketError> {
        if payload.len() > PAYLOAD_LEN {
            return Err(PacketError::PayloadTooLarge(payload.len()));
        }
        Ok(Self {
            header: SegmentHeader::new(seq, ack, flags),
            payload,
        })
    }

    /// A segment without payload (SYN, FIN, pure ACK).
    pub fn control(seq: SeqNum, ack: SeqNum, flags: u8) -> Self {
        Self {
            header: SegmentHeader::new(seq, ack, flags),
            payload: Bytes::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Sequence number immediately after this segment's payload.
    pub fn end_seq(&self) -> SeqNum {
        self.header.seq_num.wrapping_add(self.payload.len() as u32)
    }

    /// Same segment with a different flag set, payload shared.
    pub fn with_flags(&self, flags: u8) -> Self {
        Self {
            header: SegmentHeader {
                flags,
                ..self.header
            },
            payload: self.payload.clone(),
        }
    }

    pub fn encode(&self) -> [u8; PACKET_LEN] {
        let mut buf = [0u8; PACKET_LEN];
        let h = &self.header;

        buf[OFF_SEQ..OFF_SEQ + 2].copy_from_slice(&h.seq_num.raw().to_le_bytes());
        buf[OFF_ACK..OFF_ACK + 2].copy_from_slice(&h.ack_num.raw().to_le_bytes());
        buf[OFF_SYN] = h.is_syn() as u8;
        buf[OFF_FIN] = h.is_fin() as u8;
        buf[OFF_ACK_FLAG] = h.is_ack() as u8;
        buf[OFF_DUPACK] = h.is_dupack() as u8;
        buf[OFF_LENGTH..OFF_LENGTH + 4].copy_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf[HEADER_LEN..HEADER_LEN + self.payload.len()].copy_from_slice(&self.payload);

        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() != PACKET_LEN {
            return Err(PacketError::WrongSize(buf.len()));
        }

        let seq_raw = u16::from_le_bytes([buf[OFF_SEQ], buf[OFF_SEQ + 1]]);
        let ack_raw = u16::from_le_bytes([buf[OFF_ACK], buf[OFF_ACK + 1]]);
        let seq = SeqNum::checked(seq_raw).ok_or(PacketError::SeqOutOfRange(seq_raw))?;
        let ack = SeqNum::checked(ack_raw).ok_or(PacketError::SeqOutOfRange(ack_raw))?;

        let length = u32::from_le_bytes([
            buf[OFF_LENGTH],
            buf[OFF_LENGTH + 1],
            buf[OFF_LENGTH + 2],
            buf[OFF_LENGTH + 3],
        ]);
        if length as usize > PAYLOAD_LEN {
            return Err(PacketError::LengthOutOfRange(length));
        }

        let mut bits = 0;
        for (offset, flag) in [
            (OFF_SYN, flags::SYN),
            (OFF_FIN, flags::FIN),
            (OFF_ACK_FLAG, flags::ACK),
            (OFF_DUPACK, flags::DUPACK),
        ] {
            if buf[offset] != 0 {
                bits |= flag;
            }
        }

        Ok(Self {
            header: SegmentHeader::new(seq, ack, bits),
            payload: Bytes::copy_from_slice(&buf[HEADER_LEN..HEADER_LEN + length as usize]),
        })
    }
}
