//! # Codec Errors
//!
//! The three caller-visible ingestion error kinds. Everything else (duplicate,
//! outdated, useless repair, singular matrix) is silent policy tracked through
//! counters, never surfaced as an `Err`.

/// Result type used by the wire codec and the encoder/decoder ingestion paths.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors an `Encoder` or `Decoder` can raise while ingesting a packet.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// The type byte is out of range, or a packet of the wrong role was
    /// handed to an encoder (non-ack) or decoder (non-source/repair).
    #[error("packet type {0} is not valid for this role")]
    PacketType(u8),

    /// An embedded length field would require reading past the end of the
    /// input buffer.
    #[error("packet field would read past the end of the buffer")]
    Overflow,

    /// Allocation failed for an aligned buffer or coefficient matrix of the
    /// given byte size.
    #[error("allocation failed for a {0}-byte buffer")]
    OutOfMemory(usize),
}
