//! # netfec
//!
//! Sliding-window forward error correction for unreliable datagram streams.
//! An [`Encoder`] turns a stream of application payloads into source packets
//! and periodic repair packets (linear combinations over `GF(2^w)`); a
//! [`Decoder`] reassembles the original stream from whatever subset of those
//! packets actually arrives, reconstructing missing sources either directly
//! or by inverting a small coefficient matrix built from several repairs.
//!
//! ## Crate structure
//!
//! - [`gf`] — Galois field arithmetic (scalar and region operations)
//! - [`matrix`] — square matrices and Gauss-Jordan inversion over a field
//! - [`buffer`] — 16-byte-aligned growable byte buffers for GF regions
//! - [`coeff`] — the deterministic repair/source coefficient schedule
//! - [`symbol`] — in-memory source and repair symbols
//! - [`packet`] — the wire packet schema and codec
//! - [`sink`] — the two hand-off traits between the codec and its host
//! - [`source_list`] — the encoder's sliding window of unacknowledged sources
//! - [`encoder`] — the encoder state machine
//! - [`decoder`] — the decoder state machine
//! - [`error`] — the caller-visible error type

pub mod buffer;
pub mod coeff;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod gf;
pub mod matrix;
pub mod packet;
pub mod sink;
pub mod source_list;
pub mod symbol;

pub use decoder::{Decoder, DecoderStats};
pub use encoder::{CodeType, Encoder, EncoderStats};
pub use error::{CodecError, Result};
pub use gf::GaloisField;
pub use packet::{AckPacket, Packet, RepairPacket, SourcePacket};
pub use sink::{DataSink, PacketSink};
