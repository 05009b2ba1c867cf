//! Wire format serialization and deserialization.
//!
//! Every frame starts with the connection's channel number and a kind byte.
//! All integers are big-endian.
//!
//! ```text
//! frame := channel (2) || kind (1) || body
//!
//! ADV  (kind 0): rtmetric (2)
//! DATA (kind 1): packet_id (1) || esender (2) || eseqno (1) || ttl (1)
//!                || max_rexmit (1) || flags (1) || hops (1) || rtmetric (2)
//!                || payload (rest)
//! ACK  (kind 2): packet_id (1) || flags (1) || rtmetric (2)
//! ```
//!
//! DATA flags:
//! - bit 0: dummy (keepalive or probe)
//!
//! ACK flags: see [`AckFlags`]. Unknown bits are dropped on decode.

use alloc::vec::Vec;

use crate::types::{
    AckFlags, AckFrame, Addr, DataFrame, Rtmetric, FRAME_ACK, FRAME_ADV, FRAME_DATA,
};

/// Bytes preceding the payload in a DATA frame.
pub const DATA_OVERHEAD: usize = 2 + 1 + 10;

/// Decoding error types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Unexpected end of buffer.
    UnexpectedEof,
    /// Unknown frame kind.
    InvalidKind,
    /// Null address where a node address is required.
    InvalidAddress,
    /// Trailing bytes after a fixed-size frame.
    InvalidLength,
}

impl core::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DecodeError::UnexpectedEof => write!(f, "unexpected end of frame"),
            DecodeError::InvalidKind => write!(f, "unknown frame kind"),
            DecodeError::InvalidAddress => write!(f, "null address"),
            DecodeError::InvalidLength => write!(f, "trailing bytes"),
        }
    }
}

/// Zero-copy reader over a byte slice.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let v = *self.buf.get(self.pos).ok_or(DecodeError::UnexpectedEof)?;
        self.pos += 1;
        Ok(v)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::UnexpectedEof);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u16_be(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Read a non-null address.
    pub fn read_addr(&mut self) -> Result<Addr, DecodeError> {
        let bytes = self.read_bytes(2)?;
        let addr = Addr([bytes[0], bytes[1]]);
        if addr.is_null() {
            return Err(DecodeError::InvalidAddress);
        }
        Ok(addr)
    }

    /// Consume everything left.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos.min(self.buf.len())..];
        self.pos = self.buf.len();
        rest
    }
}

/// Writer for encoding frames.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub fn write_u16_be(&mut self, v: u16) {
        self.write_bytes(&v.to_be_bytes());
    }

    pub fn write_addr(&mut self, addr: &Addr) {
        self.write_bytes(&addr.0);
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Trait for types that can be encoded to wire format.
pub trait Encode {
    fn encode(&self, w: &mut Writer);

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.finish()
    }
}

/// Trait for types that can be decoded from wire format.
pub trait Decode: Sized {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError>;

    /// Decode from a byte slice (strict: rejects trailing bytes).
    fn decode_from_slice(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data);
        let result = Self::decode(&mut r)?;
        if !r.is_empty() {
            return Err(DecodeError::InvalidLength);
        }
        Ok(result)
    }
}

/// Body of a collect frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Neighbor advertisement carrying the sender's metric.
    Adv { rtmetric: Rtmetric },
    Data(DataFrame),
    Ack(AckFrame),
}

/// A frame tagged with its channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub channel: u16,
    pub frame: Frame,
}

impl Envelope {
    pub fn new(channel: u16, frame: Frame) -> Self {
        Self { channel, frame }
    }
}

impl Encode for DataFrame {
    fn encode(&self, w: &mut Writer) {
        w.write_u8(self.packet_id);
        w.write_addr(&self.esender);
        w.write_u8(self.eseqno);
        w.write_u8(self.ttl);
        w.write_u8(self.max_rexmits);
        w.write_u8(self.flags);
        w.write_u8(self.hops);
        w.write_u16_be(self.rtmetric);
        w.write_bytes(&self.payload);
    }
}

impl Decode for DataFrame {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(DataFrame {
            packet_id: r.read_u8()?,
            esender: r.read_addr()?,
            eseqno: r.read_u8()?,
            ttl: r.read_u8()?,
            max_rexmits: r.read_u8()?,
            flags: r.read_u8()?,
            hops: r.read_u8()?,
            rtmetric: r.read_u16_be()?,
            payload: r.read_rest().to_vec(),
        })
    }
}

impl Encode for AckFrame {
    fn encode(&self, w: &mut Writer) {
        w.write_u8(self.packet_id);
        w.write_u8(self.flags.bits());
        w.write_u16_be(self.rtmetric);
    }
}

impl Decode for AckFrame {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(AckFrame {
            packet_id: r.read_u8()?,
            flags: AckFlags::from_bits(r.read_u8()?),
            rtmetric: r.read_u16_be()?,
        })
    }
}

impl Encode for Envelope {
    fn encode(&self, w: &mut Writer) {
        w.write_u16_be(self.channel);
        match &self.frame {
            Frame::Adv { rtmetric } => {
                w.write_u8(FRAME_ADV);
                w.write_u16_be(*rtmetric);
            }
            Frame::Data(data) => {
                w.write_u8(FRAME_DATA);
                data.encode(w);
            }
            Frame::Ack(ack) => {
                w.write_u8(FRAME_ACK);
                ack.encode(w);
            }
        }
    }

    fn encode_to_vec(&self) -> Vec<u8> {
        let payload_len = match &self.frame {
            Frame::Data(data) => data.payload.len(),
            _ => 0,
        };
        let mut w = Writer::with_capacity(DATA_OVERHEAD + payload_len);
        self.encode(&mut w);
        w.finish()
    }
}

impl Decode for Envelope {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let channel = r.read_u16_be()?;
        let frame = match r.read_u8()? {
            FRAME_ADV => Frame::Adv {
                rtmetric: r.read_u16_be()?,
            },
            FRAME_DATA => Frame::Data(DataFrame::decode(r)?),
            FRAME_ACK => Frame::Ack(AckFrame::decode(r)?),
            _ => return Err(DecodeError::InvalidKind),
        };
        Ok(Envelope { channel, frame })
    }
}

/// Read only the channel number, without decoding the body.
pub fn peek_channel(data: &[u8]) -> Option<u16> {
    Reader::new(data).read_u16_be().ok()
}
