//! # Encoder State Machine
//!
//! Turns a stream of application payloads into source and repair packets.
//! Owns a sliding window of unacknowledged sources, a monotonically
//! increasing id allocator for both sources and repairs, and (optionally) an
//! adaptive repair rate driven by incoming acks.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::coeff::coefficient;
use crate::error::{CodecError, Result};
use crate::gf::GaloisField;
use crate::packet::{AckPacket, Packet, RepairPacket, SourcePacket};
use crate::sink::PacketSink;
use crate::source_list::SourceList;
use crate::symbol::{Repair, Source};

/// Whether the encoder emits raw source packets alongside repairs, or
/// relies on repairs alone to carry every source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeType {
    /// Source packets are sent verbatim alongside periodic repairs.
    Systematic,
    /// No source packet is ever sent; every submitted source is carried by
    /// its own single-source repair, with additional multi-source repairs
    /// at each rate boundary for redundancy.
    NonSystematic,
}

/// Monotonic counters exposed read-only via [`Encoder::stats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EncoderStats {
    pub nb_sent_sources: u64,
    pub nb_sent_repairs: u64,
    pub nb_received_acks: u64,
}

/// The encoder half of the codec.
pub struct Encoder<S: PacketSink> {
    gf: Arc<GaloisField>,
    sink: S,
    code_type: CodeType,
    rate: u32,
    max_rate: u32,
    adaptive: bool,
    window_limit: u32,
    next_source_id: u32,
    next_repair_id: u32,
    window: SourceList,
    stats: EncoderStats,
}

impl<S: PacketSink> Encoder<S> {
    /// A new encoder over `GF(2^w)`, with the reference defaults: `rate=5`,
    /// unbounded window, systematic coding, and adaptive rate disabled.
    pub fn new(w: u32, sink: S) -> Self {
        Encoder {
            gf: Arc::new(GaloisField::new(w)),
            sink,
            code_type: CodeType::Systematic,
            rate: 5,
            max_rate: 32,
            adaptive: false,
            window_limit: u32::MAX,
            next_source_id: 0,
            next_repair_id: 0,
            window: SourceList::new(),
            stats: EncoderStats::default(),
        }
    }

    pub fn stats(&self) -> &EncoderStats {
        &self.stats
    }

    /// Number of sources currently retained in the window.
    pub fn window(&self) -> usize {
        self.window.len()
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn set_rate(&mut self, rate: u32) {
        debug_assert!(rate >= 1);
        self.rate = rate.max(1);
    }

    pub fn set_max_rate(&mut self, max_rate: u32) {
        debug_assert!(max_rate >= 1);
        self.max_rate = max_rate.max(1);
    }

    pub fn set_window_size(&mut self, n: u32) {
        debug_assert!(n >= 1);
        self.window_limit = n.max(1);
    }

    pub fn set_code_type(&mut self, code_type: CodeType) {
        self.code_type = code_type;
    }

    pub fn set_adaptive(&mut self, adaptive: bool) {
        self.adaptive = adaptive;
    }

    /// Submit one application payload for transmission. Allocates a source
    /// id, appends it to the window, emits a source packet if systematic (or
    /// a dedicated single-source repair if non-systematic), enforces the
    /// window cap, and emits a rate-boundary repair when due.
    pub fn submit_payload(&mut self, payload: &[u8]) {
        debug_assert!(!payload.is_empty(), "payload must be non-empty");

        let id = self.next_source_id;
        self.next_source_id += 1;

        let source = Source::from_payload(id, payload);

        match self.code_type {
            CodeType::Systematic => {
                let packet = Packet::Source(SourcePacket {
                    id,
                    user_size: source.user_size,
                    payload: bytes::Bytes::copy_from_slice(payload),
                });
                packet.write(&mut self.sink);
            }
            CodeType::NonSystematic => {
                let repair_id = self.next_repair_id;
                self.next_repair_id += 1;
                let repair = build_repair(&self.gf, repair_id, std::iter::once(&source));
                self.emit_repair(repair);
            }
        }

        self.window.push_back(source);
        self.stats.nb_sent_sources += 1;

        if self.window.len() as u32 > self.window_limit {
            if let Some(dropped) = self.window.pop_front() {
                trace!(id = dropped.id, "window cap exceeded, dropping oldest source");
            }
        }

        if self.next_source_id % self.rate == 0 {
            self.generate_repair();
        }
    }

    /// Ingest an ack: must be an ack packet. Prunes every listed id from the
    /// window and feeds the `nb_packets`/retained-count pair into rate
    /// adaptation.
    pub fn ingest_packet(&mut self, data: &[u8]) -> Result<()> {
        let mut cursor = data;
        let (packet, _consumed) = Packet::decode(&mut cursor)?;
        let ack = match packet {
            Packet::Ack(ack) => ack,
            Packet::Repair(_) => return Err(CodecError::PacketType(crate::packet::TYPE_REPAIR)),
            Packet::Source(_) => return Err(CodecError::PacketType(crate::packet::TYPE_SOURCE)),
        };
        self.on_ack(ack);
        Ok(())
    }

    fn on_ack(&mut self, ack: AckPacket) {
        self.window.erase_by_ids(&ack.source_ids);
        self.stats.nb_received_acks += 1;
        if self.adaptive {
            self.adapt_rate(ack.source_ids.len() as u32, ack.nb_packets);
        }
    }

    /// `rate = max(1, round(max_rate * (1 - 2 * loss_fraction)))`, where
    /// `loss_fraction = 1 - retained/total`. Meets both endpoint guarantees:
    /// zero loss gives `max_rate`, 50%+ loss clamps to `1`.
    fn adapt_rate(&mut self, retained: u32, total: u16) {
        if total == 0 {
            return;
        }
        let loss_fraction = 1.0 - (retained as f64 / total as f64);
        let raw = self.max_rate as f64 * (1.0 - 2.0 * loss_fraction);
        let rate = raw.round().clamp(1.0, self.max_rate as f64) as u32;
        debug!(rate, loss_fraction, "adaptive rate updated");
        self.rate = rate;
    }

    /// Build and emit a repair from every source currently in the window.
    /// Public because the external interface table exposes it directly, not
    /// just as an internal rate-boundary trigger.
    pub fn generate_repair(&mut self) {
        if self.window.is_empty() {
            return;
        }
        let repair_id = self.next_repair_id;
        self.next_repair_id += 1;
        // `self.window.iter()` and `&self.gf` are both shared borrows of
        // disjoint fields, so this doesn't conflict with `emit_repair`'s
        // later `&mut self` the way a `self.build_repair(self.window.iter())`
        // call would (that form borrows all of `self` mutably while
        // `self.window` is still borrowed immutably for the iterator).
        let repair = build_repair(&self.gf, repair_id, self.window.iter());
        self.emit_repair(repair);
    }

    fn emit_repair(&mut self, repair: Repair) {
        let packet = Packet::Repair(RepairPacket {
            id: repair.id,
            source_ids: repair.source_ids.into_iter().collect(),
            encoded_size: repair.encoded_size,
            symbol: bytes::Bytes::copy_from_slice(&repair.symbol),
        });
        packet.write(&mut self.sink);
        self.stats.nb_sent_repairs += 1;
    }
}

/// Fold `sources` (at least one) into a fresh repair with id `repair_id`:
/// `repair.symbol = XOR_i c_i * source_i.symbol`, `repair.encoded_size = XOR_i
/// c_i * source_i.user_size`, `c_i = coefficient(repair_id, source_i.id)`.
///
/// A free function rather than an `Encoder` method so callers can hold an
/// iterator borrowing `encoder.window` without that borrow overlapping a
/// `&mut self` call — `encoder.build_repair(encoder.window.iter())` would
/// borrow all of `self` mutably while the iterator still borrows
/// `self.window` immutably.
fn build_repair<'a>(gf: &GaloisField, repair_id: u32, mut sources: impl Iterator<Item = &'a Source>) -> Repair {
    let first = sources.next().expect("build_repair requires at least one source");
    let mut repair = Repair::new(repair_id, first.symbol.len());

    let c = coefficient(gf, repair_id, first.id);
    gf.region_mul(&first.symbol, &mut repair.symbol, c);
    repair.encoded_size = gf.mul_size(first.user_size, c);
    repair.source_ids.insert(first.id);

    for source in sources {
        if source.symbol.len() > repair.symbol.len() {
            repair.symbol.resize(source.symbol.len());
        }
        let c = coefficient(gf, repair_id, source.id);
        gf.region_mul_add(&source.symbol, &mut repair.symbol, c);
        repair.encoded_size ^= gf.mul_size(source.user_size, c);
        repair.source_ids.insert(source.id);
    }
    repair
}
