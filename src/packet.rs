//! # Packet Schema & Wire Codec
//!
//! On-the-wire representation of the three packet kinds a codec instance can
//! send or receive. Every multi-byte field is big-endian; byte 0 is always
//! the type tag. Mirrors `ntc::detail::packetizer_simple` byte-for-byte.
//!
//! ```text
//! source:  u8(2) u32(id) u16(user_size) bytes[user_size]
//! repair:  u8(1) u32(id) u16(nb_ids) u32[nb_ids] u16(encoded_size) u16(symbol_len) bytes[symbol_len]
//! ack:     u8(0) u16(nb_ids) u32[nb_ids] u16(nb_packets)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CodecError, Result};
use crate::sink::PacketSink;

/// Packet type tag, byte 0 of every packet.
pub const TYPE_ACK: u8 = 0;
pub const TYPE_REPAIR: u8 = 1;
pub const TYPE_SOURCE: u8 = 2;

/// A single application payload, as it appears on the wire (no padding: the
/// 16-byte-aligned, zero-padded symbol used internally for GF arithmetic is
/// built from this by the encoder/decoder, not carried over the wire).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePacket {
    pub id: u32,
    pub user_size: u16,
    pub payload: Bytes,
}

/// A repair packet: a linear combination of sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairPacket {
    pub id: u32,
    /// Strictly ascending.
    pub source_ids: Vec<u32>,
    pub encoded_size: u16,
    pub symbol: Bytes,
}

/// An acknowledgement: the set of source ids the receiver currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckPacket {
    /// Ascending.
    pub source_ids: Vec<u32>,
    pub nb_packets: u16,
}

/// Any one of the three wire packet kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Ack(AckPacket),
    Repair(RepairPacket),
    Source(SourcePacket),
}

impl Packet {
    /// Serialize and push through `sink`: one (or more) fragment calls
    /// followed by `end_packet()`. Sinks are free to coalesce fragments or
    /// treat the whole packet as a single datagram.
    pub fn write(&self, sink: &mut dyn PacketSink) {
        let mut buf = BytesMut::with_capacity(self.encoded_len_hint());
        self.encode(&mut buf);
        sink.send_fragment(&buf);
        sink.end_packet();
    }

    fn encoded_len_hint(&self) -> usize {
        match self {
            Packet::Ack(a) => 3 + 4 * a.source_ids.len(),
            Packet::Repair(r) => 1 + 4 + 2 + 4 * r.source_ids.len() + 2 + 2 + r.symbol.len(),
            Packet::Source(s) => 1 + 4 + 2 + s.payload.len(),
        }
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        match self {
            Packet::Ack(a) => {
                buf.put_u8(TYPE_ACK);
                buf.put_u16(a.source_ids.len() as u16);
                for id in &a.source_ids {
                    buf.put_u32(*id);
                }
                buf.put_u16(a.nb_packets);
            }
            Packet::Repair(r) => {
                buf.put_u8(TYPE_REPAIR);
                buf.put_u32(r.id);
                buf.put_u16(r.source_ids.len() as u16);
                for id in &r.source_ids {
                    buf.put_u32(*id);
                }
                buf.put_u16(r.encoded_size);
                buf.put_u16(r.symbol.len() as u16);
                buf.put_slice(&r.symbol);
            }
            Packet::Source(s) => {
                buf.put_u8(TYPE_SOURCE);
                buf.put_u32(s.id);
                buf.put_u16(s.user_size);
                buf.put_slice(&s.payload);
            }
        }
    }

    /// Parse one packet from the front of `buf`, returning the packet and
    /// the number of bytes consumed. `buf`'s cursor is advanced exactly that
    /// far; on error (`PacketType`/`Overflow`) the cursor position is
    /// unspecified and the caller should discard the buffer.
    pub fn decode(buf: &mut impl Buf) -> Result<(Packet, usize)> {
        let start_remaining = buf.remaining();
        if !buf.has_remaining() {
            return Err(CodecError::Overflow);
        }
        let ty = buf.get_u8();
        let packet = match ty {
            TYPE_ACK => Packet::Ack(decode_ack(buf)?),
            TYPE_REPAIR => Packet::Repair(decode_repair(buf)?),
            TYPE_SOURCE => Packet::Source(decode_source(buf)?),
            other => return Err(CodecError::PacketType(other)),
        };
        let consumed = start_remaining - buf.remaining();
        Ok((packet, consumed))
    }
}

fn need(buf: &impl Buf, n: usize) -> Result<()> {
    if buf.remaining() < n {
        Err(CodecError::Overflow)
    } else {
        Ok(())
    }
}

fn decode_ack(buf: &mut impl Buf) -> Result<AckPacket> {
    need(buf, 2)?;
    let nb_ids = buf.get_u16() as usize;
    need(buf, nb_ids * 4)?;
    let mut source_ids = Vec::with_capacity(nb_ids);
    for _ in 0..nb_ids {
        source_ids.push(buf.get_u32());
    }
    need(buf, 2)?;
    let nb_packets = buf.get_u16();
    Ok(AckPacket {
        source_ids,
        nb_packets,
    })
}

fn decode_repair(buf: &mut impl Buf) -> Result<RepairPacket> {
    need(buf, 4)?;
    let id = buf.get_u32();
    need(buf, 2)?;
    let nb_ids = buf.get_u16() as usize;
    need(buf, nb_ids * 4)?;
    let mut source_ids = Vec::with_capacity(nb_ids);
    for _ in 0..nb_ids {
        source_ids.push(buf.get_u32());
    }
    need(buf, 2)?;
    let encoded_size = buf.get_u16();
    need(buf, 2)?;
    let symbol_len = buf.get_u16() as usize;
    need(buf, symbol_len)?;
    let symbol = buf.copy_to_bytes(symbol_len);
    Ok(RepairPacket {
        id,
        source_ids,
        encoded_size,
        symbol,
    })
}

fn decode_source(buf: &mut impl Buf) -> Result<SourcePacket> {
    need(buf, 4)?;
    let id = buf.get_u32();
    need(buf, 2)?;
    let user_size = buf.get_u16();
    need(buf, user_size as usize)?;
    let payload = buf.copy_to_bytes(user_size as usize);
    Ok(SourcePacket {
        id,
        user_size,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn roundtrip(p: Packet) {
        let mut buf = BytesMut::new();
        p.encode(&mut buf);
        let len = buf.len();
        let mut cursor = &buf[..];
        let (decoded, consumed) = Packet::decode(&mut cursor).expect("decode");
        assert_eq!(decoded, p);
        assert_eq!(consumed, len);
    }

    #[test]
    fn source_round_trip() {
        roundtrip(Packet::Source(SourcePacket {
            id: 7,
            user_size: 3,
            payload: Bytes::from_static(b"abc"),
        }));
    }

    #[test]
    fn repair_round_trip() {
        roundtrip(Packet::Repair(RepairPacket {
            id: 1,
            source_ids: vec![0, 1, 2],
            encoded_size: 42,
            symbol: Bytes::from(vec![0u8; 16]),
        }));
    }

    #[test]
    fn ack_round_trip() {
        roundtrip(Packet::Ack(AckPacket {
            source_ids: vec![0, 2, 5],
            nb_packets: 9,
        }));
    }

    #[test]
    fn unknown_type_byte_is_packet_type_error() {
        let buf = [9u8, 0, 0, 0, 0];
        let mut cursor = &buf[..];
        assert_eq!(Packet::decode(&mut cursor), Err(CodecError::PacketType(9)));
    }

    #[test]
    fn truncated_source_is_overflow() {
        // type + id, but missing user_size and payload.
        let buf = [TYPE_SOURCE, 0, 0, 0, 1];
        let mut cursor = &buf[..];
        assert_eq!(Packet::decode(&mut cursor), Err(CodecError::Overflow));
    }

    #[test]
    fn truncated_repair_symbol_is_overflow() {
        let mut buf = BytesMut::new();
        buf.put_u8(TYPE_REPAIR);
        buf.put_u32(1);
        buf.put_u16(0); // nb_ids = 0
        buf.put_u16(0); // encoded_size
        buf.put_u16(16); // symbol_len = 16, but no bytes follow
        let mut cursor = &buf[..];
        assert_eq!(Packet::decode(&mut cursor), Err(CodecError::Overflow));
    }

    #[test]
    fn empty_buffer_is_overflow() {
        let buf: [u8; 0] = [];
        let mut cursor = &buf[..];
        assert_eq!(Packet::decode(&mut cursor), Err(CodecError::Overflow));
    }
}
