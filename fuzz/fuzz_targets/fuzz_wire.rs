#![no_main]

use libfuzzer_sys::fuzz_target;
use netfec::Packet;

/// Fuzz the wire packet decoder.
///
/// Must never panic on any input; malformed or truncated data should
/// surface as an `Err`, never a crash.
fuzz_target!(|data: &[u8]| {
    let mut buf = data;
    let _ = Packet::decode(&mut buf);
});
