use std::sync::Arc;

use bytes::Bytes;
use proptest::prelude::*;
use twip::protocol::{FragmentHeader, encode_frame};
use twip::transport::{BusHub, DropReason, LoopbackBus};
use twip::{Engine, EngineConfig, Error, Flag, Fragmentation, MAX_TTL, ReceiveOutcome};

const SENDER: u8 = 0x05;
const RECEIVER: u8 = 0x20;

fn node(hub: &BusHub, address: u8) -> Arc<Engine<LoopbackBus>> {
    Engine::new(EngineConfig::new(address), hub.attach()).expect("engine")
}

/// Sends a message with delivery held back and returns the frames that hit the wires.
fn capture_frames(len: usize) -> Vec<Bytes> {
    let hub = BusHub::new();
    let sender = node(&hub, SENDER);
    let _receiver = node(&hub, RECEIVER);
    hub.set_delivery(false);

    let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
    sender.send(RECEIVER, 0x02, &payload).unwrap();
    hub.transfers().into_iter().map(|t| t.frame).collect()
}

#[test]
fn reassembles_175_bytes_end_to_end() {
    let hub = BusHub::new();
    let sender = node(&hub, SENDER);
    let receiver = node(&hub, RECEIVER);

    let report = sender.send(RECEIVER, 0x02, &[0xAA; 175]).unwrap();
    assert_eq!(report.fragments, 7);
    assert_eq!(receiver.pending_bytes(), 7 * 33);

    let message = receiver.receive();
    assert!(message.is_complete());
    assert_eq!(message.sender(), SENDER);
    assert_eq!(message.opcode(), 0x02);
    assert_eq!(message.size(), 175);
    assert_eq!(message.fragmentation(), Some(Fragmentation::End));
    assert!(!receiver.has_pending());
    assert_eq!(message.into_payload().as_ref(), &[0xAA; 175][..]);
}

#[test]
fn node_can_send_to_itself() {
    let hub = BusHub::new();
    let node = node(&hub, SENDER);

    node.send(SENDER, 0x02, &[0x5A; 60]).unwrap();
    let message = node.receive();
    assert!(message.is_complete());
    assert_eq!(message.sender(), SENDER);
    assert_eq!(message.size(), 60);
}

#[test]
fn messages_come_out_in_arrival_order() {
    let hub = BusHub::new();
    let sender = node(&hub, SENDER);
    let receiver = node(&hub, RECEIVER);

    sender.send(RECEIVER, 0x01, &[1; 30]).unwrap();
    sender.send(RECEIVER, 0x02, b"second").unwrap();

    let first = receiver.receive();
    assert!(first.is_complete());
    assert_eq!((first.opcode(), first.id(), first.size()), (0x01, 0, 30));

    let second = receiver.receive();
    assert!(second.is_complete());
    assert_eq!((second.opcode(), second.id()), (0x02, 1));
    assert_eq!(second.payload().as_ref(), b"second");

    assert!(!receiver.receive().is_complete());
    let stats = receiver.stats();
    assert_eq!(stats.messages_received, 2);
    assert_eq!(stats.fragments_admitted, 3);
}

#[test]
fn partial_message_continues_after_requeue() {
    let frames = capture_frames(100);
    assert_eq!(frames.len(), 4);

    let hub = BusHub::new();
    let receiver = node(&hub, RECEIVER);
    receiver.ingest(&frames[0]).unwrap();
    receiver.ingest(&frames[1]).unwrap();

    match receiver.poll() {
        ReceiveOutcome::Requeued { partial, ttl } => {
            assert_eq!(ttl, 1);
            assert_eq!(partial.size(), 50);
            assert!(!partial.is_complete());
        }
        other => panic!("expected requeue, got {other:?}"),
    }

    receiver.ingest(&frames[2]).unwrap();
    receiver.ingest(&frames[3]).unwrap();

    let message = receiver.receive();
    assert!(message.is_complete());
    assert_eq!(message.id(), 0);
    assert_eq!(message.sender(), SENDER);
    let expected: Vec<u8> = (0..100u8).collect();
    assert_eq!(message.payload().as_ref(), expected.as_slice());
}

#[test]
fn lost_final_fragment_expires() {
    let frames = capture_frames(60);
    let hub = BusHub::new();
    let receiver = node(&hub, RECEIVER);
    receiver.ingest(&frames[0]).unwrap();
    receiver.ingest(&frames[1]).unwrap();

    for expected in 1..=MAX_TTL {
        let outcome = receiver.poll();
        assert!(
            matches!(outcome, ReceiveOutcome::Requeued { ttl, .. } if ttl == expected),
            "poll {expected}: {outcome:?}"
        );
    }

    match receiver.poll() {
        ReceiveOutcome::Dropped { partial, reason } => {
            assert_eq!(reason, DropReason::TtlExceeded);
            assert_eq!(partial.size(), 50);
        }
        other => panic!("expected drop, got {other:?}"),
    }
    assert!(!receiver.has_pending());
    assert_eq!(receiver.poll(), ReceiveOutcome::Empty);

    // A late tail stands alone; the expired head is gone for good
    receiver.ingest(&frames[2]).unwrap();
    let tail = receiver.receive();
    assert!(tail.is_complete());
    assert_eq!(tail.size(), 10);
}

#[test]
fn rejects_malformed_frames() {
    let hub = BusHub::new();
    let receiver = node(&hub, RECEIVER);

    assert!(matches!(
        receiver.ingest(&[0; 4]),
        Err(Error::FrameTooShort { min: 8, got: 4 })
    ));

    // Header plus three payload bytes without the zero padding
    let header = FragmentHeader::new(SENDER, Flag::from_u8(0), 0x02, 0, 3);
    let frame = encode_frame(&header, &[1, 2, 3]);
    assert!(matches!(
        receiver.ingest(&frame[..10]),
        Err(Error::Misaligned { got: 10 })
    ));

    let header = FragmentHeader::new(SENDER, Flag::from_u8(0), 0x02, 0, 20);
    let frame = encode_frame(&header, &[0; 20]);
    assert!(matches!(
        receiver.ingest(&frame[..16]),
        Err(Error::Truncated { .. })
    ));

    // Checksum is right but 0b10 is not a fragmentation state
    let header = FragmentHeader::new(SENDER, Flag::from_u8(0b10), 0x02, 0, 1);
    let frame = encode_frame(&header, &[7]);
    assert!(matches!(
        receiver.ingest(&frame),
        Err(Error::InvalidFragmentation { flag: 0b10 })
    ));

    assert!(!receiver.has_pending());
    assert_eq!(receiver.stats().dropped_malformed, 4);
}

proptest! {
    #[test]
    fn roundtrip_up_to_175_bytes(
        payload in proptest::collection::vec(any::<u8>(), 0..=175),
        opcode in any::<u8>(),
    ) {
        let hub = BusHub::new();
        let sender = node(&hub, SENDER);
        let receiver = node(&hub, RECEIVER);

        sender.send(RECEIVER, opcode, &payload).unwrap();
        let message = receiver.receive();

        prop_assert!(message.is_complete());
        prop_assert_eq!(message.sender(), SENDER);
        prop_assert_eq!(message.opcode(), opcode);
        prop_assert_eq!(message.payload().as_ref(), payload.as_slice());
        prop_assert!(!receiver.has_pending());
    }

    #[test]
    fn corrupted_header_is_dropped(index in 0usize..7, mask in 1u8..=255) {
        let mut frame = capture_frames(25)[0].to_vec();
        frame[index] ^= mask;

        let hub = BusHub::new();
        let receiver = node(&hub, RECEIVER);
        let before = receiver.pending_bytes();

        prop_assert!(receiver.ingest(&frame).is_err());
        prop_assert_eq!(receiver.pending_bytes(), before);
        prop_assert_eq!(receiver.stats().fragments_dropped(), 1);
    }
}
