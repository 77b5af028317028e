//! # Transport Hooks
//!
//! The two opaque hand-off points between the codec core and the host
//! transport: a sink for bytes ready to go on the wire, and a sink for
//! payloads ready to hand back to the application. Neither is blocking or
//! fallible from the codec's point of view — buffering and I/O errors are
//! the host's problem.
//!
//! Blanket impls over `FnMut` closures let callers pass a closure directly
//! instead of defining a type, matching the ergonomics favored elsewhere in
//! this codebase for event-drain style callbacks.

/// Receives the serialized bytes of an outgoing packet.
///
/// Called with one or more fragments of a single packet, then with
/// `end_packet()` to mark the boundary. A sink is free to coalesce
/// fragments into one write or to forward each whole packet as a single
/// datagram.
pub trait PacketSink {
    fn send_fragment(&mut self, chunk: &[u8]);
    fn end_packet(&mut self);
}

impl<F: FnMut(&[u8])> PacketSink for F {
    fn send_fragment(&mut self, chunk: &[u8]) {
        self(chunk)
    }

    fn end_packet(&mut self) {
        self(&[])
    }
}

/// Receives a fully reconstructed or directly-received application payload.
pub trait DataSink {
    fn deliver(&mut self, payload: &[u8]);
}

impl<F: FnMut(&[u8])> DataSink for F {
    fn deliver(&mut self, payload: &[u8]) {
        self(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_packet_sink_sees_fragment_then_end() {
        let mut seen: Vec<Vec<u8>> = Vec::new();
        let mut sink = |chunk: &[u8]| seen.push(chunk.to_vec());
        sink.send_fragment(&[1, 2, 3]);
        sink.end_packet();
        assert_eq!(seen, vec![vec![1, 2, 3], vec![]]);
    }

    #[test]
    fn closure_data_sink_receives_payload() {
        let mut delivered: Vec<Vec<u8>> = Vec::new();
        let mut sink = |payload: &[u8]| delivered.push(payload.to_vec());
        sink.deliver(b"hello");
        assert_eq!(delivered, vec![b"hello".to_vec()]);
    }
}
