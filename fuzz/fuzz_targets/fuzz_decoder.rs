#![no_main]

use libfuzzer_sys::fuzz_target;
use netfec::Decoder;

/// Fuzz `Decoder::ingest_packet` with arbitrary bytes.
///
/// Splits the input on the first zero byte to get a handful of independent
/// "packets" fed to the same decoder instance, exercising the duplicate,
/// outdated, useless-repair, and matrix-inversion paths with attacker-
/// controlled ids and coefficients. Must never panic.
fuzz_target!(|data: &[u8]| {
    let mut decoder = Decoder::new(8, true, |_: &[u8]| {}, |_: &[u8]| {});
    for chunk in data.split(|&b| b == 0) {
        if chunk.is_empty() {
            continue;
        }
        let _ = decoder.ingest_packet(chunk);
    }
});
