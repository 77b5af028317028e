//! # Coding Coefficient Schedule
//!
//! Encoder and decoder must agree, without exchanging any extra state, on
//! which coefficient a given repair used for a given source. Both sides
//! derive it from nothing but the two IDs and the field size, so the
//! schedule has to be a pure function of `(repair_id, source_id, field_size)`.

use crate::gf::GaloisField;

/// The coefficient a repair with id `repair_id` uses for a source with id
/// `source_id`, in `gf`.
///
/// `((repair_id + 1) * (source_id + 1)) mod field_size`. Both IDs are offset
/// by one so that `repair_id == 0` or `source_id == 0` doesn't force the
/// coefficient to zero, which would make that source unrecoverable from any
/// repair built while its id was zero.
pub fn coefficient(gf: &GaloisField, repair_id: u32, source_id: u32) -> u32 {
    let field_size = gf.size();
    let r = (repair_id as u64) + 1;
    let s = (source_id as u64) + 1;
    ((r * s) % field_size) as u32
}
