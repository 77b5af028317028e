//! # Decoder State Machine
//!
//! Turns arriving source and repair packets back into an in-order stream of
//! application payloads. Tracks which sources have been seen, which are
//! still missing but referenced by at least one repair, and reconstructs
//! missing sources either directly (a repair left with exactly one
//! outstanding reference) or by inverting a coefficient matrix built from
//! several repairs at once (§4.C).
//!
//! Grounded in `netcode::detail::decoder` (`original_source/netcode/detail/
//! decoder.cc`): the outdated/duplicate/useless drop order, the recursive
//! single-source cascade, and the full-decoding matrix layout all follow
//! that file. The C++ original threads raw iterators into `missing_sources`
//! to dodge a second map lookup and juggles iterator invalidation with a
//! reverse loop; here a repair is only inserted into `repairs` (and only
//! registered in `missing_sources`) once its final reference set for this
//! arrival is known, which sidesteps that dance entirely.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use quanta::Instant;
use tracing::{debug, trace};

use crate::coeff::coefficient;
use crate::error::{CodecError, Result};
use crate::gf::GaloisField;
use crate::matrix::{self, SquareMatrix};
use crate::packet::{AckPacket, Packet, RepairPacket, SourcePacket, TYPE_ACK};
use crate::sink::{DataSink, PacketSink};
use crate::symbol::{pad16, Repair, Source};
use crate::buffer::AlignedBuf;

/// Monotonic counters exposed read-only via [`Decoder::stats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DecoderStats {
    pub nb_received_sources: u64,
    pub nb_received_repairs: u64,
    pub nb_sent_acks: u64,
    pub nb_decoded: u64,
    pub nb_useless_repairs: u64,
    pub nb_failed_full_decodings: u64,
}

/// The decoder half of the codec.
pub struct Decoder<P: PacketSink, D: DataSink> {
    gf: Arc<GaloisField>,
    packet_sink: P,
    data_sink: D,

    in_order: bool,
    ack_frequency: Duration,
    ack_nb_packets: u16,

    received_sources: BTreeMap<u32, Rc<Source>>,
    repairs: BTreeMap<u32, Repair>,
    /// source id -> ids of repairs still referencing it.
    missing_sources: BTreeMap<u32, BTreeSet<u32>>,
    last_seen_id: Option<u32>,

    in_order_hold: BTreeMap<u32, Rc<Source>>,
    first_missing: u32,

    packets_since_ack: u16,
    last_ack_time: Instant,

    stats: DecoderStats,
}

impl<P: PacketSink, D: DataSink> Decoder<P, D> {
    /// A new decoder over `GF(2^w)`, with the reference defaults:
    /// `ack_frequency = 100ms`, count-based acks disabled.
    pub fn new(w: u32, in_order: bool, packet_sink: P, data_sink: D) -> Self {
        Decoder {
            gf: Arc::new(GaloisField::new(w)),
            packet_sink,
            data_sink,
            in_order,
            ack_frequency: Duration::from_millis(100),
            ack_nb_packets: 0,
            received_sources: BTreeMap::new(),
            repairs: BTreeMap::new(),
            missing_sources: BTreeMap::new(),
            last_seen_id: None,
            in_order_hold: BTreeMap::new(),
            first_missing: 0,
            packets_since_ack: 0,
            last_ack_time: Instant::now(),
            stats: DecoderStats::default(),
        }
    }

    pub fn stats(&self) -> &DecoderStats {
        &self.stats
    }

    /// Number of source ids currently referenced by at least one repair but
    /// not yet received or reconstructed. Observational, not a counter.
    pub fn missing_sources(&self) -> usize {
        self.missing_sources.len()
    }

    /// Smallest id not yet delivered to the data sink, when `in_order=true`.
    pub fn first_missing(&self) -> u32 {
        self.first_missing
    }

    /// Number of decoded-or-received sources parked waiting for an earlier
    /// gap to close, when `in_order=true`.
    pub fn in_order_hold_len(&self) -> usize {
        self.in_order_hold.len()
    }

    pub fn set_ack_frequency(&mut self, ms: u64) {
        self.ack_frequency = Duration::from_millis(ms);
    }

    pub fn set_ack_nb_packets(&mut self, n: u16) {
        self.ack_nb_packets = n;
    }

    /// Parse and ingest one packet. Must be a source or a repair.
    pub fn ingest_packet(&mut self, data: &[u8]) -> Result<()> {
        let mut cursor = data;
        let (packet, _consumed) = Packet::decode(&mut cursor)?;
        match packet {
            Packet::Source(s) => {
                self.on_source(s);
                Ok(())
            }
            Packet::Repair(r) => {
                self.on_repair(r);
                Ok(())
            }
            Packet::Ack(_) => Err(CodecError::PacketType(TYPE_ACK)),
        }
    }

    fn on_source(&mut self, packet: SourcePacket) {
        if let Some(last) = self.last_seen_id {
            if packet.id < last {
                trace!(id = packet.id, "dropping outdated source");
                return;
            }
        }
        if self.received_sources.contains_key(&packet.id) {
            trace!(id = packet.id, "dropping duplicate source");
            return;
        }

        let source = Source::from_payload(packet.id, &packet.payload);
        self.add_source_recursive(source, false);
        self.attempt_full_decoding();

        self.stats.nb_received_sources += 1;
        self.maybe_ack();
    }

    fn on_repair(&mut self, packet: RepairPacket) {
        debug_assert!(!packet.source_ids.is_empty(), "repair with no source ids");
        let max_id = *packet.source_ids.iter().max().expect("non-empty");
        let min_id = *packet.source_ids.iter().min().expect("non-empty");

        if let Some(last) = self.last_seen_id {
            if max_id < last {
                trace!(id = packet.id, "dropping outdated repair");
                return;
            }
        }
        if self.repairs.contains_key(&packet.id) {
            trace!(id = packet.id, "dropping duplicate repair");
            return;
        }

        self.prune_before(min_id);

        let useless = packet
            .source_ids
            .iter()
            .all(|id| self.received_sources.contains_key(id));
        if useless {
            self.stats.nb_useless_repairs += 1;
            trace!(id = packet.id, "dropping useless repair");
            return;
        }

        let source_ids: BTreeSet<u32> = packet.source_ids.iter().copied().collect();
        let mut repair = Repair::from_wire(packet.id, source_ids, packet.encoded_size, &packet.symbol);

        let ids: Vec<u32> = repair.source_ids.iter().copied().collect();
        let mut newly_missing = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(src) = self.received_sources.get(&id).cloned() {
                self.subtract_source(&src, &mut repair);
                repair.source_ids.remove(&id);
            } else {
                newly_missing.push(id);
            }
        }
        debug_assert!(!repair.source_ids.is_empty(), "useless check should have caught this");

        if repair.source_ids.len() == 1 {
            let decoded = self.reconstruct_single(&repair);
            debug!(repair_id = repair.id, source_id = decoded.id, "single-source reconstruction");
            self.add_source_recursive(decoded, true);
        } else {
            let rid = repair.id;
            for id in newly_missing {
                self.missing_sources.entry(id).or_default().insert(rid);
            }
            self.repairs.insert(rid, repair);
            self.attempt_full_decoding();
        }

        self.stats.nb_received_repairs += 1;
        self.maybe_ack();
    }

    /// Subtract `src`'s contribution from `repair`'s running symbol/size,
    /// growing the repair's accumulator first if `src` is wider than it.
    fn subtract_source(&self, src: &Source, repair: &mut Repair) {
        if src.symbol.len() > repair.symbol.len() {
            repair.symbol.resize(pad16(src.symbol.len()));
        }
        let c = coefficient(&self.gf, repair.id, src.id);
        self.gf.region_mul_add(&src.symbol, &mut repair.symbol, c);
        repair.encoded_size ^= self.gf.mul_size(src.user_size, c);
    }

    /// Reconstruct the sole source still referenced by a single-source
    /// repair: `src = inv(c) * repair.symbol`, `src.size = inv(c) *
    /// repair.encoded_size` (GF scalar), `c = coefficient(repair.id, src.id)`.
    fn reconstruct_single(&self, repair: &Repair) -> Source {
        let src_id = *repair.source_ids.iter().next().expect("single-source repair");
        let c = coefficient(&self.gf, repair.id, src_id);
        let inv = self.gf.invert(c);
        let sz = self.gf.mul_size(repair.encoded_size, inv);

        let padded = pad16(sz as usize);
        let mut symbol = AlignedBuf::with_capacity(padded);
        let dst = symbol.grow_uninit(padded);
        dst.fill(0);
        let len = padded.min(repair.symbol.len());
        self.gf.region_mul(&repair.symbol[..len], &mut symbol[..len], inv);

        Source {
            id: src_id,
            user_size: sz,
            symbol,
        }
    }

    /// Deliver a newly known source (received or reconstructed), propagate
    /// its contribution to every repair waiting on it, cascade through any
    /// repairs that become single-source as a result, then record it.
    fn add_source_recursive(&mut self, source: Source, reconstructed: bool) {
        let id = source.id;
        let rc = Rc::new(source);
        self.deliver(rc.clone());

        if let Some(waiting) = self.missing_sources.remove(&id) {
            for rid in waiting {
                if let Some(repair) = self.repairs.get_mut(&rid) {
                    let c = coefficient(&self.gf, rid, id);
                    if rc.symbol.len() > repair.symbol.len() {
                        repair.symbol.resize(pad16(rc.symbol.len()));
                    }
                    self.gf.region_mul_add(&rc.symbol, &mut repair.symbol, c);
                    repair.encoded_size ^= self.gf.mul_size(rc.user_size, c);
                    repair.source_ids.remove(&id);
                }
            }
        }

        loop {
            let resolved = self.missing_sources.iter().find_map(|(&mid, rids)| {
                if rids.len() == 1 {
                    let rid = *rids.iter().next().unwrap();
                    match self.repairs.get(&rid) {
                        Some(r) if r.source_ids.len() == 1 => Some((mid, rid)),
                        _ => None,
                    }
                } else {
                    None
                }
            });
            let Some((mid, rid)) = resolved else { break };
            self.missing_sources.remove(&mid);
            let repair = self.repairs.remove(&rid).expect("looked up above");
            let decoded = self.reconstruct_single(&repair);
            self.add_source_recursive(decoded, true);
        }

        self.received_sources.insert(id, rc);
        if reconstructed {
            self.stats.nb_decoded += 1;
        }
    }

    /// Hand `source` to the data sink (immediately, or once its place in the
    /// sequence comes up), draining any later sources already held.
    fn deliver(&mut self, source: Rc<Source>) {
        if !self.in_order {
            self.data_sink.deliver(source.payload());
            return;
        }
        if source.id == self.first_missing {
            self.data_sink.deliver(source.payload());
            self.first_missing += 1;
            self.flush_in_order_hold();
        } else {
            debug_assert!(source.id > self.first_missing);
            self.in_order_hold.insert(source.id, source);
        }
    }

    fn flush_in_order_hold(&mut self) {
        while let Some(source) = self.in_order_hold.remove(&self.first_missing) {
            self.data_sink.deliver(source.payload());
            self.first_missing += 1;
        }
    }

    /// Everything strictly smaller than `id` is now outdated: advance
    /// `last_seen_id`, drop repairs/sources/missing-entries below it, and
    /// (if `in_order`) fast-forward `first_missing` past the gap.
    fn prune_before(&mut self, id: u32) {
        self.last_seen_id = Some(self.last_seen_id.map_or(id, |last| last.max(id)));

        self.repairs.retain(|_, r| r.max_source_id().map_or(true, |m| m >= id));
        self.received_sources.retain(|&k, _| k >= id);
        self.missing_sources.retain(|&k, _| k >= id);
        self.in_order_hold.retain(|&k, _| k >= id);

        if self.in_order && self.first_missing < id {
            self.first_missing = id;
            self.flush_in_order_hold();
        }
    }

    /// Try to invert a `k x k` coefficient matrix (rows: missing sources,
    /// columns: repairs, ascending id order) when exactly `k` of each are
    /// outstanding. On success, every missing source is reconstructed and
    /// `repairs`/`missing_sources` are cleared. On failure, drop the one
    /// repair responsible and leave the rest of the state untouched.
    fn attempt_full_decoding(&mut self) {
        if self.repairs.is_empty() || self.missing_sources.is_empty() {
            return;
        }
        if self.missing_sources.len() > self.repairs.len() {
            return;
        }
        debug_assert_eq!(self.missing_sources.len(), self.repairs.len());

        let repair_ids: Vec<u32> = self.repairs.keys().copied().collect();
        let missing_ids: Vec<u32> = self.missing_sources.keys().copied().collect();
        let n = repair_ids.len();

        let mut mat = SquareMatrix::new(n);
        for (col, &rid) in repair_ids.iter().enumerate() {
            let repair = &self.repairs[&rid];
            for (row, &sid) in missing_ids.iter().enumerate() {
                let v = if repair.source_ids.contains(&sid) {
                    coefficient(&self.gf, rid, sid)
                } else {
                    0
                };
                mat.set(row, col, v);
            }
        }

        let mut inv = SquareMatrix::new(n);
        match matrix::invert(&self.gf, &mut mat, &mut inv) {
            Some(faulty_col) => {
                self.stats.nb_failed_full_decodings += 1;
                let faulty_rid = repair_ids[faulty_col];
                debug!(repair_id = faulty_rid, "full decoding failed, dropping faulty repair");
                if let Some(repair) = self.repairs.remove(&faulty_rid) {
                    for sid in repair.source_ids {
                        if let Some(set) = self.missing_sources.get_mut(&sid) {
                            set.remove(&faulty_rid);
                        }
                    }
                }
            }
            None => {
                let mut decoded = Vec::with_capacity(n);
                for (i, &sid) in missing_ids.iter().enumerate() {
                    let mut src_sz: u16 = 0;
                    for (j, &rid) in repair_ids.iter().enumerate() {
                        let c = inv.get(j, i);
                        if c != 0 {
                            src_sz ^= self.gf.mul_size(self.repairs[&rid].encoded_size, c);
                        }
                    }

                    let padded = pad16(src_sz as usize);
                    let mut symbol = AlignedBuf::with_capacity(padded);
                    let dst = symbol.grow_uninit(padded);
                    dst.fill(0);
                    for (j, &rid) in repair_ids.iter().enumerate() {
                        let c = inv.get(j, i);
                        if c == 0 {
                            continue;
                        }
                        let repair = &self.repairs[&rid];
                        let len = padded.min(repair.symbol.len());
                        self.gf.region_mul_add(&repair.symbol[..len], &mut symbol[..len], c);
                    }

                    decoded.push(Source {
                        id: sid,
                        user_size: src_sz,
                        symbol,
                    });
                }

                debug!(count = decoded.len(), "full decoding succeeded");
                self.stats.nb_decoded += decoded.len() as u64;
                self.repairs.clear();
                self.missing_sources.clear();

                for source in decoded {
                    let rc = Rc::new(source);
                    self.deliver(rc.clone());
                    self.received_sources.insert(rc.id, rc);
                }
            }
        }
    }

    fn maybe_ack(&mut self) {
        self.packets_since_ack += 1;
        let count_due = self.ack_nb_packets > 0 && self.packets_since_ack >= self.ack_nb_packets;
        let time_due = !self.ack_frequency.is_zero() && self.last_ack_time.elapsed() >= self.ack_frequency;
        if count_due || time_due {
            self.generate_ack();
        }
    }

    /// Emit an ack naming every source id currently held, and how many
    /// source+repair packets arrived since the previous ack.
    pub fn generate_ack(&mut self) {
        let source_ids: Vec<u32> = self.received_sources.keys().copied().collect();
        let ack = AckPacket {
            source_ids,
            nb_packets: self.packets_since_ack,
        };
        Packet::Ack(ack).write(&mut self.packet_sink);
        self.packets_since_ack = 0;
        self.last_ack_time = Instant::now();
        self.stats.nb_sent_acks += 1;
    }
}
