//! # In-Memory Source and Repair Symbols
//!
//! The domain-level counterparts of [`crate::packet::SourcePacket`] and
//! [`crate::packet::RepairPacket`]: these hold 16-byte-aligned symbol
//! buffers so [`crate::gf::GaloisField`] region operations can run directly
//! against them, whereas the wire packets carry only the exact application
//! bytes with no padding.

use std::collections::BTreeSet;

use crate::buffer::{AlignedBuf, ZeroedAlignedBuf};

/// Round `n` up to the next multiple of 16 (0 stays 0).
pub fn pad16(n: usize) -> usize {
    (n + 15) & !15
}

/// A source payload held by either the encoder's window or the decoder's
/// received-sources map.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: u32,
    pub user_size: u16,
    /// Zero-padded to a multiple of 16 bytes; `symbol.len() >= user_size`.
    pub symbol: AlignedBuf,
}

impl Source {
    /// Build a `Source` from raw, unpadded application bytes.
    pub fn from_payload(id: u32, payload: &[u8]) -> Self {
        let user_size = payload.len() as u16;
        let mut symbol = AlignedBuf::with_capacity(pad16(payload.len()));
        symbol.extend_from_slice(payload);
        let pad = pad16(payload.len()) - payload.len();
        if pad > 0 {
            symbol.extend_from_slice(&vec![0u8; pad]);
        }
        Source {
            id,
            user_size,
            symbol,
        }
    }

    /// The exact application bytes, with padding stripped.
    pub fn payload(&self) -> &[u8] {
        &self.symbol[..self.user_size as usize]
    }
}

impl PartialEq for Source {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.user_size == other.user_size && self.payload() == other.payload()
    }
}

/// A repair symbol: a Galois-field linear combination of the sources
/// currently named in `source_ids`. As sources it references arrive, their
/// contribution is subtracted and their id removed from `source_ids`; once
/// only one id remains the decoder can solve for that source directly.
#[derive(Debug, Clone)]
pub struct Repair {
    pub id: u32,
    /// Ids of the sources still combined into this repair. Starts as every
    /// source the encoder folded in; shrinks as the decoder peels off
    /// already-received contributions.
    pub source_ids: BTreeSet<u32>,
    /// Running GF-XOR of `coefficient * source.user_size` for every source
    /// still (or ever) folded in — used to recover a lost source's size.
    pub encoded_size: u16,
    /// Zero-padded symbol, XOR-accumulated over the sources it combines.
    pub symbol: ZeroedAlignedBuf,
}

impl Repair {
    pub fn new(id: u32, capacity: usize) -> Self {
        Repair {
            id,
            source_ids: BTreeSet::new(),
            encoded_size: 0,
            // Final length is known up front, so the one-allocation fast path
            // applies rather than `resize`'s incremental reserve-then-fill.
            symbol: ZeroedAlignedBuf::zeroed_fast(pad16(capacity)),
        }
    }

    /// Rebuild a `Repair` from a wire-format repair packet's fields: the raw
    /// (unpadded) symbol bytes are copied into a freshly zero-padded buffer.
    pub fn from_wire(id: u32, source_ids: BTreeSet<u32>, encoded_size: u16, symbol: &[u8]) -> Self {
        let mut padded = ZeroedAlignedBuf::zeroed_fast(pad16(symbol.len()));
        padded[..symbol.len()].copy_from_slice(symbol);
        Repair {
            id,
            source_ids,
            encoded_size,
            symbol: padded,
        }
    }

    /// Smallest referenced source id, if any remain.
    pub fn min_source_id(&self) -> Option<u32> {
        self.source_ids.iter().next().copied()
    }

    /// Largest referenced source id, if any remain.
    pub fn max_source_id(&self) -> Option<u32> {
        self.source_ids.iter().next_back().copied()
    }
}
