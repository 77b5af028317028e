//! # Integration tests: Encoder -> wire -> Decoder
//!
//! No real network I/O — packets pass directly through in-memory queues, and
//! impairment (loss, reordering) is applied explicitly in each test by
//! choosing which encoder-emitted packets get fed to the decoder.

use std::cell::RefCell;
use std::rc::Rc;

use netfec::{CodeType, Decoder, Encoder};

fn recording() -> (impl FnMut(&[u8]), Rc<RefCell<Vec<Vec<u8>>>>) {
    let packets = Rc::new(RefCell::new(Vec::new()));
    let packets_clone = packets.clone();
    let mut current = Vec::new();
    let sink = move |chunk: &[u8]| {
        if chunk.is_empty() {
            packets_clone.borrow_mut().push(std::mem::take(&mut current));
        } else {
            current.extend_from_slice(chunk);
        }
    };
    (sink, packets)
}

fn delivered_sink() -> (impl FnMut(&[u8]), Rc<RefCell<Vec<Vec<u8>>>>) {
    let out = Rc::new(RefCell::new(Vec::new()));
    let out_clone = out.clone();
    let f = move |payload: &[u8]| out_clone.borrow_mut().push(payload.to_vec());
    (f, out)
}

#[test]
fn trivial_delivery_no_loss() {
    let (enc_sink, enc_packets) = recording();
    let mut enc = Encoder::new(8, enc_sink);
    enc.set_rate(100);
    for payload in [&b"one"[..], b"two", b"three", b"four"] {
        enc.submit_payload(payload);
    }

    let (dec_sink, _) = recording();
    let (data_sink, delivered) = delivered_sink();
    let mut dec = Decoder::new(8, true, dec_sink, data_sink);
    for pkt in enc_packets.borrow().iter() {
        dec.ingest_packet(pkt).unwrap();
    }

    assert_eq!(
        &delivered.borrow()[..],
        &[b"one".to_vec(), b"two".to_vec(), b"three".to_vec(), b"four".to_vec()]
    );
}

#[test]
fn single_loss_recovered_by_its_repair() {
    let (enc_sink, enc_packets) = recording();
    let mut enc = Encoder::new(8, enc_sink);
    enc.set_rate(4);
    for i in 0u8..4 {
        enc.submit_payload(&[i; 8]);
    }
    // packets: source0, source1, source2, source3, repair
    let packets = enc_packets.borrow();
    assert_eq!(packets.len(), 5);

    let (dec_sink, _) = recording();
    let (data_sink, delivered) = delivered_sink();
    let mut dec = Decoder::new(8, true, dec_sink, data_sink);

    // Drop source2, keep everything else including the repair.
    for (i, pkt) in packets.iter().enumerate() {
        if i == 2 {
            continue;
        }
        dec.ingest_packet(pkt).unwrap();
    }

    assert_eq!(
        &delivered.borrow()[..],
        &[vec![0u8; 8], vec![1u8; 8], vec![2u8; 8], vec![3u8; 8]]
    );
    assert_eq!(dec.stats().nb_decoded, 1);
}

#[test]
fn two_losses_recovered_by_matrix_inversion() {
    let (enc_sink, enc_packets) = recording();
    let mut enc = Encoder::new(8, enc_sink);
    enc.set_rate(1000);
    for i in 0u8..4 {
        enc.submit_payload(&[i; 8]);
    }
    enc.generate_repair();
    enc.generate_repair();

    // packets: source0..3, repair4, repair5
    let packets = enc_packets.borrow();
    assert_eq!(packets.len(), 6);

    let (dec_sink, _) = recording();
    let (data_sink, delivered) = delivered_sink();
    let mut dec = Decoder::new(8, true, dec_sink, data_sink);

    // Drop source1 and source2; both repairs arrive.
    for (i, pkt) in packets.iter().enumerate() {
        if i == 1 || i == 2 {
            continue;
        }
        dec.ingest_packet(pkt).unwrap();
    }

    assert_eq!(
        &delivered.borrow()[..],
        &[vec![0u8; 8], vec![1u8; 8], vec![2u8; 8], vec![3u8; 8]]
    );
    assert_eq!(dec.stats().nb_decoded, 2);
}

#[test]
fn repair_with_every_source_already_known_is_useless() {
    let (enc_sink, enc_packets) = recording();
    let mut enc = Encoder::new(8, enc_sink);
    enc.set_rate(2);
    enc.submit_payload(b"aaaaaaaa");
    enc.submit_payload(b"bbbbbbbb");
    // packets: source0, source1, repair

    let (dec_sink, _) = recording();
    let (data_sink, _delivered) = delivered_sink();
    let mut dec = Decoder::new(8, true, dec_sink, data_sink);
    for pkt in enc_packets.borrow().iter() {
        dec.ingest_packet(pkt).unwrap();
    }

    assert_eq!(dec.stats().nb_useless_repairs, 1);
    assert_eq!(dec.missing_sources(), 0);
}

#[test]
fn out_of_order_arrival_still_delivers_in_sequence() {
    let (enc_sink, enc_packets) = recording();
    let mut enc = Encoder::new(8, enc_sink);
    enc.set_rate(1000);
    for i in 0u8..5 {
        enc.submit_payload(&[i]);
    }

    let (dec_sink, _) = recording();
    let (data_sink, delivered) = delivered_sink();
    let mut dec = Decoder::new(8, true, dec_sink, data_sink);

    let packets = enc_packets.borrow();
    let order = [4, 1, 3, 0, 2];
    for &i in &order {
        dec.ingest_packet(&packets[i]).unwrap();
    }

    assert_eq!(
        &delivered.borrow()[..],
        &[vec![0u8], vec![1u8], vec![2u8], vec![3u8], vec![4u8]]
    );
}

#[test]
fn ack_prunes_encoder_window() {
    let (enc_sink, enc_packets) = recording();
    let mut enc = Encoder::new(8, enc_sink);
    enc.set_rate(100);
    for i in 0u8..4 {
        enc.submit_payload(&[i]);
    }
    assert_eq!(enc.window(), 4);

    let (dec_sink, dec_packets) = recording();
    let (data_sink, _delivered) = delivered_sink();
    let mut dec = Decoder::new(8, true, dec_sink, data_sink);
    for pkt in enc_packets.borrow().iter() {
        dec.ingest_packet(pkt).unwrap();
    }
    dec.generate_ack();

    let ack = dec_packets.borrow().last().unwrap().clone();
    enc.ingest_packet(&ack).unwrap();
    assert_eq!(enc.window(), 0);
}

#[test]
fn non_systematic_round_trip_carries_every_source_via_repairs() {
    let (enc_sink, enc_packets) = recording();
    let mut enc = Encoder::new(8, enc_sink);
    enc.set_code_type(CodeType::NonSystematic);
    enc.set_rate(3);
    for i in 0u8..3 {
        enc.submit_payload(&[i; 4]);
    }
    // packets: repair(src0), repair(src1), repair(src2), repair(src0..2)
    let packets = enc_packets.borrow();
    assert_eq!(packets.len(), 4);

    let (dec_sink, _) = recording();
    let (data_sink, delivered) = delivered_sink();
    let mut dec = Decoder::new(8, true, dec_sink, data_sink);
    for pkt in packets.iter() {
        dec.ingest_packet(pkt).unwrap();
    }

    assert_eq!(
        &delivered.borrow()[..],
        &[vec![0u8; 4], vec![1u8; 4], vec![2u8; 4]]
    );
}

#[test]
fn duplicates_are_not_delivered_twice() {
    let (enc_sink, enc_packets) = recording();
    let mut enc = Encoder::new(8, enc_sink);
    enc.set_rate(100);
    enc.submit_payload(b"only-once");

    let (dec_sink, _) = recording();
    let (data_sink, delivered) = delivered_sink();
    let mut dec = Decoder::new(8, true, dec_sink, data_sink);
    let source_pkt = enc_packets.borrow()[0].clone();
    for _ in 0..3 {
        dec.ingest_packet(&source_pkt).unwrap();
    }

    assert_eq!(delivered.borrow().len(), 1);
}

#[test]
fn outdated_source_is_dropped_after_a_repair_advances_last_seen_id() {
    use bytes::Bytes;
    use netfec::{Packet, RepairPacket, SourcePacket};

    let (dec_sink, _) = recording();
    let (data_sink, delivered) = delivered_sink();
    let mut dec = Decoder::new(8, false, dec_sink, data_sink);

    // A repair naming only ids 5 and 6 moves last_seen_id to 5 (the minimum
    // of its source ids), without resolving to anything (two unknowns, one
    // equation).
    let (mut one_shot, wire) = recording();
    Packet::Repair(RepairPacket {
        id: 0,
        source_ids: vec![5, 6],
        encoded_size: 0,
        symbol: Bytes::from(vec![0u8; 16]),
    })
    .write(&mut one_shot);
    dec.ingest_packet(&wire.borrow()[0]).unwrap();

    // Source id 2 is now strictly below last_seen_id and must be silently
    // dropped rather than delivered.
    let (mut one_shot, wire) = recording();
    Packet::Source(SourcePacket {
        id: 2,
        user_size: 1,
        payload: Bytes::from_static(b"x"),
    })
    .write(&mut one_shot);
    dec.ingest_packet(&wire.borrow()[0]).unwrap();

    assert!(delivered.borrow().is_empty());
    assert_eq!(dec.stats().nb_received_sources, 0);
}
