//! Protocol engine: fragmentation on send, validated ingest, and FIFO
//! reassembly with TTL-bounded requeue on receive.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

#[cfg(feature = "debug-tools")]
use std::path::PathBuf;

use bytes::{BufMut, BytesMut};
use tracing::{debug, instrument, trace, warn};

#[cfg(feature = "debug-tools")]
use super::debug::{Direction, PcapRecorder};
use super::buffer::RingBuffer;
use super::bus::{Bus, BusStatus};
use crate::protocol::metrics::{FragmentOutcome, PartialOutcome, Stats};
use crate::protocol::{
    DEFAULT_MAX_TRANSFER, Error, Flag, Fragment, FragmentHeader, Fragmentation, HEADER_SIZE,
    MAX_ADDRESS, MAX_BUFFER_SIZE, MAX_FRAGMENT_PAYLOAD, Message, Result, StatsSnapshot,
    encode_frame, fragment_count, max_chunk,
};

/// Engine configuration options.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EngineConfig {
    /// Own 7-bit bus address, stamped as sender on every fragment.
    pub address: u8,
    /// Receive ring buffer capacity in bytes (clamped to 254).
    pub buffer_capacity: usize,
    /// Largest frame the bus moves in one transaction.
    pub max_transfer: usize,
    /// Optional PCAP capture of every sent frame and of admitted frames as
    /// they are drained (debug builds only).
    #[cfg(feature = "debug-tools")]
    pub capture_path: Option<PathBuf>,
}

impl EngineConfig {
    /// Default configuration for the given bus address.
    #[must_use]
    pub fn new(address: u8) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }

    /// Check the configuration before any hardware is touched.
    pub fn validate(&self) -> Result<()> {
        if self.address > MAX_ADDRESS {
            return Err(Error::InvalidAddress {
                address: self.address,
                max: MAX_ADDRESS,
            });
        }

        if max_chunk(self.max_transfer) == 0 {
            return Err(Error::InvalidConfig(format!(
                "max_transfer {} cannot carry a header and one payload byte",
                self.max_transfer
            )));
        }

        // Smallest record: length prefix + header
        if self.buffer_capacity.min(MAX_BUFFER_SIZE) <= HEADER_SIZE {
            return Err(Error::InvalidConfig(format!(
                "buffer_capacity {} cannot hold a single record",
                self.buffer_capacity
            )));
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            address: 0x01,
            buffer_capacity: MAX_BUFFER_SIZE,
            max_transfer: DEFAULT_MAX_TRANSFER,
            #[cfg(feature = "debug-tools")]
            capture_path: None,
        }
    }
}

/// Summary of a message whose final fragment reached the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    /// Id shared by every fragment of the message
    pub id: u8,
    /// Number of fragments transmitted
    pub fragments: usize,
}

/// Why a partially reassembled message was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// TTL already at its ceiling
    TtlExceeded,
    /// Not enough ring space to requeue the partial aggregate
    NoSpace,
}

/// Result of one reassembly pass over the receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Nothing buffered
    Empty,
    /// A terminating fragment was reached
    Complete(Message),
    /// Buffer ran dry first; the partial aggregate went back with TTL + 1
    Requeued {
        /// What had been gathered so far
        partial: Message,
        /// TTL stamped on the requeued record
        ttl: u8,
    },
    /// Buffer ran dry first and the partial aggregate was discarded
    Dropped {
        /// What had been gathered before the drop
        partial: Message,
        /// Why it could not be kept
        reason: DropReason,
    },
}

impl ReceiveOutcome {
    /// Check if a whole message was reassembled
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }

    /// Message carried by this outcome; incomplete for anything but `Complete`.
    #[must_use]
    pub fn into_message(self) -> Message {
        match self {
            Self::Empty => Message::empty(),
            Self::Complete(message)
            | Self::Requeued {
                partial: message, ..
            }
            | Self::Dropped {
                partial: message, ..
            } => message,
        }
    }
}

/// Header fields taken from the first record of a drain.
#[derive(Clone, Copy)]
struct Lead {
    sender: u8,
    flag: Flag,
    opcode: u8,
    id: u8,
}

/// TWIP protocol engine bound to one bus driver.
///
/// Shared as `Arc<Engine<B>>`: the bus holds a weak handle through its
/// receive callback and calls [`Engine::ingest`]; the application calls
/// [`Engine::send`] and [`Engine::receive`] from its main loop. The ring
/// buffer and the bus driver sit behind separate short-lived locks.
pub struct Engine<B: Bus> {
    config: EngineConfig,
    max_chunk: usize,
    bus: Mutex<B>,
    rx: Mutex<RingBuffer>,
    next_id: AtomicU8,
    stats: Stats,
    #[cfg(feature = "debug-tools")]
    capture: Option<PcapRecorder>,
}

impl<B: Bus + Send + 'static> Engine<B> {
    /// Validate `config`, wire the receive callback into `bus`, set the own
    /// address, and initialize the bus.
    #[instrument(level = "info", skip(config, bus), fields(address = config.address))]
    pub fn new(config: EngineConfig, mut bus: B) -> Result<Arc<Self>> {
        config.validate()?;

        #[cfg(feature = "debug-tools")]
        let capture = match &config.capture_path {
            Some(path) => Some(
                PcapRecorder::create(path)
                    .map_err(|err| Error::InvalidConfig(format!("capture file: {err}")))?,
            ),
            None => None,
        };

        let mut status = BusStatus::Ok;
        let engine = Arc::new_cyclic(|weak: &Weak<Self>| {
            let handle = weak.clone();
            bus.register_receive_callback(Arc::new(move |frame: &[u8]| {
                if let Some(engine) = handle.upgrade() {
                    // Drops are counted and traced inside ingest.
                    let _ = engine.ingest(frame);
                }
            }));
            bus.set_own_address(config.address);
            status = bus.initialize();

            Self {
                max_chunk: max_chunk(config.max_transfer),
                rx: Mutex::new(RingBuffer::new(config.buffer_capacity)),
                bus: Mutex::new(bus),
                next_id: AtomicU8::new(0),
                stats: Stats::default(),
                #[cfg(feature = "debug-tools")]
                capture,
                config,
            }
        });

        if !status.is_ok() {
            return Err(Error::BusInit { status });
        }

        debug!(
            max_chunk = engine.max_chunk,
            capacity = engine.lock_rx().capacity(),
            "engine ready"
        );
        Ok(engine)
    }
}

impl<B: Bus> Engine<B> {
    fn lock_rx(&self) -> MutexGuard<'_, RingBuffer> {
        self.rx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_bus(&self) -> MutexGuard<'_, B> {
        self.bus.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Own bus address.
    #[must_use]
    pub fn address(&self) -> u8 {
        self.config.address
    }

    /// Payload bytes carried per fragment.
    #[must_use]
    pub fn max_chunk(&self) -> usize {
        self.max_chunk
    }

    /// Id the next sent message will carry.
    #[must_use]
    pub fn next_id(&self) -> u8 {
        self.next_id.load(Ordering::Relaxed)
    }

    /// Snapshot of the engine's counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Check whether any fragment record is waiting in the receive buffer.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.lock_rx().is_empty()
    }

    /// Bytes currently stored in the receive buffer.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.lock_rx().occupied()
    }

    /// Free bytes left in the receive buffer.
    #[must_use]
    pub fn free_space(&self) -> usize {
        self.lock_rx().free_space()
    }

    /// Run `f` with exclusive access to the bus driver.
    pub fn with_bus<R>(&self, f: impl FnOnce(&mut B) -> R) -> R {
        f(&mut self.lock_bus())
    }

    /// Record a drained fragment as it crossed the bus. Requeued aggregates
    /// (TTL above zero) never crossed it and are skipped.
    #[cfg(feature = "debug-tools")]
    fn capture_inbound(&self, header: &FragmentHeader, payload: &[u8]) {
        if self.capture.is_some() && header.flag().ttl() == 0 {
            let frame = encode_frame(header, payload);
            self.capture(Direction::Inbound, header.sender(), &frame);
        }
    }

    #[cfg(feature = "debug-tools")]
    fn capture(&self, direction: Direction, peer: u8, frame: &[u8]) {
        if let Some(recorder) = &self.capture {
            if let Err(err) = recorder.record(direction, peer, frame) {
                debug!(error = ?err, "failed to record frame");
            }
        }
    }

    /// Admit one raw frame from the bus into the receive buffer.
    ///
    /// Called from the bus receive notification, so it never blocks beyond
    /// one short ring critical section, never allocates and does no I/O.
    /// Rejected frames are dropped; the error says why.
    pub fn ingest(&self, raw: &[u8]) -> Result<()> {
        match self.admit(raw) {
            Ok(fragment) => {
                self.stats.record_admitted();
                trace!(
                    sender = fragment.header().sender(),
                    id = fragment.header().id(),
                    len = fragment.payload().len(),
                    "fragment admitted"
                );
                Ok(())
            }
            Err(err) => {
                self.stats.record_drop(&err);
                trace!(error = %err, len = raw.len(), "fragment dropped");
                Err(err)
            }
        }
    }

    fn admit<'a>(&self, raw: &'a [u8]) -> Result<Fragment<'a>> {
        let fragment = Fragment::parse(raw)?;
        let record_len = fragment.record_len();
        let needed = record_len + 1;

        let mut rx = self.lock_rx();
        let free = rx.free_space();
        if needed > free {
            return Err(Error::BufferFull { needed, free });
        }

        // record_len <= HEADER_SIZE + MAX_FRAGMENT_PAYLOAD, checked by parse
        #[allow(clippy::cast_possible_truncation)]
        rx.write(record_len as u8);
        rx.write_slice(&raw[..record_len]);
        Ok(fragment)
    }

    /// Fragment `payload` and transmit it to `address`.
    ///
    /// Every fragment shares the current id, which advances once after the
    /// last fragment. A failed intermediate fragment is logged and skipped;
    /// only the final fragment's status decides the result.
    #[instrument(level = "debug", skip(self, payload), fields(len = payload.len()))]
    pub fn send(&self, address: u8, opcode: u8, payload: &[u8]) -> Result<SendReport> {
        if address > MAX_ADDRESS {
            return Err(Error::InvalidAddress {
                address,
                max: MAX_ADDRESS,
            });
        }

        let chunk = self.max_chunk;
        let max = chunk * usize::from(u8::MAX);
        if payload.len() > max {
            return Err(Error::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }

        let fragments = fragment_count(payload.len(), chunk);

        // Held for the whole message so fragments of concurrent sends never interleave.
        let mut bus = self.lock_bus();
        let id = self.next_id.load(Ordering::Relaxed);
        let mut last = BusStatus::Ok;

        for index in 0..fragments {
            let start = index * chunk;
            let end = (start + chunk).min(payload.len());
            let piece = &payload[start..end];

            let state = if fragments == 1 {
                Fragmentation::NotFragmented
            } else if index + 1 == fragments {
                Fragmentation::End
            } else {
                Fragmentation::StartOrMiddle
            };

            #[allow(clippy::cast_possible_truncation)]
            let header = FragmentHeader::new(
                self.config.address,
                state.into(),
                opcode,
                id,
                piece.len() as u8,
            );
            let frame = encode_frame(&header, piece);

            last = bus.transmit(address, &frame);
            #[cfg(feature = "debug-tools")]
            self.capture(Direction::Outbound, address, &frame);

            if last.is_ok() {
                self.stats.record_fragment(FragmentOutcome::Sent);
                trace!(fragment = index + 1, fragments, len = frame.len(), "fragment sent");
            } else {
                self.stats.record_fragment(FragmentOutcome::Failed);
                warn!(fragment = index + 1, fragments, status = %last, "fragment transmit failed");
            }
        }

        self.next_id.fetch_add(1, Ordering::Relaxed);
        drop(bus);
        self.stats.record_message_sent();

        if last.is_ok() {
            Ok(SendReport { id, fragments })
        } else {
            Err(Error::Bus {
                status: last,
                address,
                fragment: fragments,
                fragments,
            })
        }
    }

    /// Reassemble the oldest buffered message; incomplete (`is_complete() ==
    /// false`) when nothing terminated.
    pub fn receive(&self) -> Message {
        self.poll().into_message()
    }

    /// Drain fragment records in arrival order until one terminates a
    /// message or the buffer runs dry.
    ///
    /// The first record supplies sender, flag, opcode and id; later records
    /// only contribute payload. An unterminated aggregate is written back as
    /// a single record with TTL + 1 so a later call can continue it, unless
    /// its TTL is already 15 or the buffer has no room. The lock taken by
    /// the drain that finds the buffer empty is held through that write, so
    /// fragments arriving meanwhile queue up behind the partial.
    #[instrument(level = "trace", skip(self))]
    pub fn poll(&self) -> ReceiveOutcome {
        let mut aggregate = BytesMut::new();
        let mut lead: Option<Lead> = None;
        let mut records = 0usize;

        // `Some` when the buffer ran dry before a terminating fragment
        let dry = loop {
            let mut rx = self.lock_rx();
            #[cfg(feature = "debug-tools")]
            let start = aggregate.len();
            let Some(header) = take_record(&mut rx, &mut aggregate) else {
                break Some(rx);
            };
            drop(rx);
            records += 1;

            #[cfg(feature = "debug-tools")]
            self.capture_inbound(&header, &aggregate[start..]);

            let lead = lead.get_or_insert(Lead {
                sender: header.sender(),
                flag: header.flag(),
                opcode: header.opcode(),
                id: header.id(),
            });

            let state = header.flag().fragmentation();
            if state == Some(Fragmentation::End) {
                lead.flag = Fragmentation::End.into();
            }
            if state.is_some_and(Fragmentation::is_terminal) {
                break None;
            }
        };

        let Some(lead) = lead else {
            return ReceiveOutcome::Empty;
        };

        let message = Message::from_parts(
            lead.sender,
            lead.flag,
            lead.opcode,
            lead.id,
            aggregate.freeze(),
            dry.is_none(),
        );

        match dry {
            Some(mut rx) => self.requeue(&mut rx, message),
            None => {
                self.stats.record_message_received();
                debug!(
                    sender = message.sender(),
                    id = message.id(),
                    size = message.size(),
                    records,
                    "message complete"
                );
                ReceiveOutcome::Complete(message)
            }
        }
    }

    /// Write `partial` back into `rx` as one aged record, or drop it.
    fn requeue(&self, rx: &mut RingBuffer, partial: Message) -> ReceiveOutcome {
        let flag = partial.flag();
        if flag.ttl_exhausted() {
            self.stats.record_partial(PartialOutcome::Expired);
            debug!(
                id = partial.id(),
                size = partial.size(),
                "partial message expired"
            );
            return ReceiveOutcome::Dropped {
                partial,
                reason: DropReason::TtlExceeded,
            };
        }

        let size = partial.size();
        let aged = flag.aged();
        let free = rx.free_space();
        if size > MAX_FRAGMENT_PAYLOAD || size + HEADER_SIZE + 1 > free {
            self.stats.record_partial(PartialOutcome::Evicted);
            debug!(id = partial.id(), size, free, "no room to requeue partial message");
            return ReceiveOutcome::Dropped {
                partial,
                reason: DropReason::NoSpace,
            };
        }

        #[allow(clippy::cast_possible_truncation)]
        let header = FragmentHeader::new(
            partial.sender(),
            aged,
            partial.opcode(),
            partial.id(),
            size as u8,
        );
        #[allow(clippy::cast_possible_truncation)]
        rx.write((HEADER_SIZE + size) as u8);
        rx.write_slice(&header.to_bytes());
        rx.write_slice(partial.payload());

        self.stats.record_partial(PartialOutcome::Requeued);
        trace!(id = partial.id(), size, ttl = aged.ttl(), "partial message requeued");
        ReceiveOutcome::Requeued {
            partial,
            ttl: aged.ttl(),
        }
    }
}

/// Consume one stored record, appending its payload to `out`.
///
/// The fragmentation flag is inspected with `peek` before the length prefix
/// is consumed. Returns `None` when the buffer is empty.
fn take_record(rx: &mut RingBuffer, out: &mut BytesMut) -> Option<FragmentHeader> {
    if rx.is_empty() {
        return None;
    }

    // prefix | sender | flag ...
    let flag = Flag::from_u8(rx.peek(2));
    let payload_len = usize::from(rx.read()?).saturating_sub(HEADER_SIZE);

    let mut raw = [0u8; HEADER_SIZE];
    for byte in &mut raw {
        *byte = rx.read()?;
    }
    debug_assert_eq!(raw[1], flag.as_u8());

    out.reserve(payload_len);
    for _ in 0..payload_len {
        out.put_u8(rx.read()?);
    }

    FragmentHeader::from_bytes(&raw).ok()
}

impl<B: Bus> std::fmt::Debug for Engine<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("max_chunk", &self.max_chunk)
            .field("next_id", &self.next_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{BusHub, LoopbackBus};
    use crate::MAX_TTL;

    const ALICE: u8 = 0x10;
    const BOB: u8 = 0x20;

    fn node(hub: &BusHub, address: u8) -> Arc<Engine<LoopbackBus>> {
        Engine::new(EngineConfig::new(address), hub.attach()).unwrap()
    }

    fn start_fragment(sender: u8, id: u8, payload: &[u8]) -> bytes::Bytes {
        let header = FragmentHeader::new(
            sender,
            Fragmentation::StartOrMiddle.into(),
            0x02,
            id,
            u8::try_from(payload.len()).unwrap(),
        );
        encode_frame(&header, payload)
    }

    #[test]
    fn test_config_validation() {
        let hub = BusHub::new();

        let result = Engine::new(EngineConfig::new(0x80), hub.attach());
        assert!(matches!(result, Err(Error::InvalidAddress { address: 0x80, .. })));

        let config = EngineConfig {
            max_transfer: 7,
            ..EngineConfig::new(ALICE)
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = EngineConfig {
            buffer_capacity: HEADER_SIZE,
            ..EngineConfig::new(ALICE)
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        assert!(EngineConfig::default().validate().is_ok());
        assert!(hub.addresses().is_empty());
    }

    #[test]
    fn test_buffer_capacity_clamped() {
        let hub = BusHub::new();
        let config = EngineConfig {
            buffer_capacity: 4096,
            ..EngineConfig::new(ALICE)
        };
        let engine = Engine::new(config, hub.attach()).unwrap();
        assert_eq!(engine.free_space(), MAX_BUFFER_SIZE);
    }

    #[test]
    fn test_engine_registers_on_bus() {
        let hub = BusHub::new();
        let alice = node(&hub, ALICE);
        assert_eq!(hub.addresses(), vec![ALICE]);
        assert_eq!(alice.with_bus(|bus| bus.address()), Some(ALICE));
        drop(alice);
        assert!(hub.addresses().is_empty());
    }

    #[test]
    fn test_single_fragment_roundtrip() {
        let hub = BusHub::new();
        let alice = node(&hub, ALICE);
        let bob = node(&hub, BOB);

        let report = alice.send(BOB, 0x07, b"toggle").unwrap();
        assert_eq!(report, SendReport { id: 0, fragments: 1 });
        assert!(bob.has_pending());

        let message = bob.receive();
        assert!(message.is_complete());
        assert_eq!(message.sender(), ALICE);
        assert_eq!(message.opcode(), 0x07);
        assert_eq!(message.id(), 0);
        assert_eq!(message.fragmentation(), Some(Fragmentation::NotFragmented));
        assert_eq!(message.payload().as_ref(), b"toggle");
        assert!(!bob.has_pending());
    }

    #[test]
    fn test_empty_payload_is_one_fragment() {
        let hub = BusHub::new();
        let alice = node(&hub, ALICE);
        let bob = node(&hub, BOB);

        let report = alice.send(BOB, 0x01, &[]).unwrap();
        assert_eq!(report.fragments, 1);
        assert_eq!(hub.transfers()[0].frame.len(), 8);

        let message = bob.receive();
        assert!(message.is_complete());
        assert_eq!(message.size(), 0);
    }

    #[test]
    fn test_receive_on_empty_buffer() {
        let hub = BusHub::new();
        let bob = node(&hub, BOB);
        assert_eq!(bob.poll(), ReceiveOutcome::Empty);
        assert!(!bob.receive().is_complete());
    }

    #[test]
    fn test_send_rejects_bad_destination_and_size() {
        let hub = BusHub::new();
        let alice = node(&hub, ALICE);

        assert!(matches!(
            alice.send(0xFF, 0, b"x"),
            Err(Error::InvalidAddress { .. })
        ));
        let huge = vec![0u8; alice.max_chunk() * 255 + 1];
        assert!(matches!(
            alice.send(BOB, 0, &huge),
            Err(Error::PayloadTooLarge { .. })
        ));
        // Nothing reached the bus and the id did not move
        assert!(hub.transfers().is_empty());
        assert_eq!(alice.next_id(), 0);
    }

    #[test]
    fn test_ingest_drops_when_full() {
        let hub = BusHub::new();
        let config = EngineConfig {
            buffer_capacity: 40,
            ..EngineConfig::new(BOB)
        };
        let bob = Engine::new(config, hub.attach()).unwrap();

        let frame = start_fragment(ALICE, 0, &[0x55; 25]);
        assert!(bob.ingest(&frame).is_ok());
        assert_eq!(bob.pending_bytes(), 33);

        let result = bob.ingest(&frame);
        assert!(matches!(
            result,
            Err(Error::BufferFull { needed: 33, free: 7 })
        ));
        assert_eq!(bob.pending_bytes(), 33);

        let stats = bob.stats();
        assert_eq!(stats.fragments_admitted, 1);
        assert_eq!(stats.dropped_buffer_full, 1);
    }

    #[test]
    fn test_ingest_stores_record_without_padding() {
        let hub = BusHub::new();
        let bob = node(&hub, BOB);

        let frame = start_fragment(ALICE, 3, b"abc");
        assert_eq!(frame.len(), 12);
        bob.ingest(&frame).unwrap();
        // prefix + header + payload, padding left behind
        assert_eq!(bob.pending_bytes(), 1 + HEADER_SIZE + 3);

        let rx = bob.lock_rx();
        assert_eq!(usize::from(rx.peek(0)), HEADER_SIZE + 3);
        assert_eq!(rx.peek(1), ALICE);
        assert_eq!(rx.peek(2), Fragmentation::StartOrMiddle.bits());
    }

    #[test]
    fn test_partial_requeued_with_aged_flag() {
        let hub = BusHub::new();
        let bob = node(&hub, BOB);
        bob.ingest(&start_fragment(ALICE, 9, &[1, 2, 3])).unwrap();

        let outcome = bob.poll();
        let ReceiveOutcome::Requeued { partial, ttl } = outcome else {
            panic!("expected requeue, got {outcome:?}");
        };
        assert_eq!(ttl, 1);
        assert!(!partial.is_complete());
        assert_eq!(partial.payload().as_ref(), &[1, 2, 3]);

        let rx = bob.lock_rx();
        assert_eq!(rx.occupied(), 1 + HEADER_SIZE + 3);
        assert_eq!(rx.peek(2), 0x11);
        assert_eq!(rx.peek(4), 9);
    }

    #[test]
    fn test_requeue_without_room_drops() {
        let hub = BusHub::new();
        let config = EngineConfig {
            buffer_capacity: 40,
            ..EngineConfig::new(BOB)
        };
        let bob = Engine::new(config, hub.attach()).unwrap();

        // A newer fragment took the space while the partial was out of the ring
        bob.ingest(&start_fragment(ALICE, 1, &[0; 20])).unwrap();
        let partial = Message::from_parts(
            ALICE,
            Fragmentation::StartOrMiddle.into(),
            0x02,
            0,
            bytes::Bytes::from_static(&[0xEE; 20]),
            false,
        );

        let outcome = bob.requeue(&mut bob.lock_rx(), partial);
        assert!(matches!(
            outcome,
            ReceiveOutcome::Dropped {
                reason: DropReason::NoSpace,
                ..
            }
        ));
        assert_eq!(bob.pending_bytes(), 28);
        assert_eq!(bob.stats().messages_evicted, 1);
    }

    #[test]
    fn test_fragment_arriving_during_requeue_queues_behind_partial() {
        let hub = BusHub::new();
        let bob = node(&hub, BOB);
        bob.ingest(&start_fragment(ALICE, 6, &[0x01; 25])).unwrap();

        let end_header = FragmentHeader::new(ALICE, Fragmentation::End.into(), 0x02, 6, 5);
        let end = encode_frame(&end_header, &[0x02; 5]);

        // Hold the ring exactly as poll does between finding it empty and
        // writing the partial back.
        let mut rx = bob.lock_rx();
        let mut aggregate = BytesMut::new();
        let head = take_record(&mut rx, &mut aggregate).unwrap();
        assert!(take_record(&mut rx, &mut aggregate).is_none());

        let late = Arc::clone(&bob);
        let ingester = std::thread::spawn(move || late.ingest(&end));
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!ingester.is_finished());

        let partial = Message::from_parts(
            head.sender(),
            head.flag(),
            head.opcode(),
            head.id(),
            aggregate.freeze(),
            false,
        );
        assert!(matches!(
            bob.requeue(&mut rx, partial),
            ReceiveOutcome::Requeued { ttl: 1, .. }
        ));
        drop(rx);
        ingester.join().unwrap().unwrap();

        let message = bob.receive();
        assert!(message.is_complete());
        assert_eq!(message.id(), 6);
        assert_eq!(message.size(), 30);
        assert_eq!(&message.payload()[..25], &[0x01; 25]);
        assert_eq!(&message.payload()[25..], &[0x02; 5]);
    }

    #[test]
    fn test_ttl_expiry() {
        let hub = BusHub::new();
        let bob = node(&hub, BOB);
        bob.ingest(&start_fragment(ALICE, 4, b"orphan")).unwrap();

        for expected in 1..=MAX_TTL {
            match bob.poll() {
                ReceiveOutcome::Requeued { ttl, partial } => {
                    assert_eq!(ttl, expected);
                    assert_eq!(partial.payload().as_ref(), b"orphan");
                }
                other => panic!("poll {expected}: expected requeue, got {other:?}"),
            }
        }

        let outcome = bob.poll();
        assert!(matches!(
            outcome,
            ReceiveOutcome::Dropped {
                reason: DropReason::TtlExceeded,
                ..
            }
        ));
        assert!(!bob.has_pending());
        assert_eq!(bob.poll(), ReceiveOutcome::Empty);

        let stats = bob.stats();
        assert_eq!(stats.messages_requeued, u64::from(MAX_TTL));
        assert_eq!(stats.messages_expired, 1);
    }

    #[test]
    fn test_take_record_reads_one_record() {
        let mut ring = RingBuffer::new(64);
        let header = FragmentHeader::new(ALICE, Fragmentation::End.into(), 1, 2, 2);
        ring.write(9);
        ring.write_slice(&header.to_bytes());
        ring.write_slice(&[0xAB, 0xCD]);
        ring.write(0x42);

        let mut out = BytesMut::new();
        let decoded = take_record(&mut ring, &mut out).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(out.as_ref(), &[0xAB, 0xCD]);
        assert_eq!(ring.read(), Some(0x42));
        assert!(take_record(&mut ring, &mut out).is_none());
    }

    #[cfg(feature = "debug-tools")]
    #[test]
    fn test_inbound_capture_happens_on_drain() {
        let path =
            std::env::temp_dir().join(format!("twip-engine-capture-{}.pcap", std::process::id()));
        let hub = BusHub::new();
        let config = EngineConfig {
            capture_path: Some(path.clone()),
            ..EngineConfig::new(BOB)
        };
        let bob = Engine::new(config, hub.attach()).unwrap();

        let frame = start_fragment(ALICE, 0, b"abc");
        bob.ingest(&frame).unwrap();
        // Global header only: ingest does no I/O
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 24);

        // Drained, requeued, drained again: only the first drain is recorded
        assert!(matches!(bob.poll(), ReceiveOutcome::Requeued { .. }));
        assert!(matches!(bob.poll(), ReceiveOutcome::Requeued { .. }));
        drop(bob);

        let bytes = std::fs::read(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(bytes.len(), 24 + 16 + 2 + frame.len());
        assert_eq!(&bytes[40..42], &[1, ALICE]);
        assert_eq!(&bytes[42..], frame.as_ref());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_config_serde_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"address": 32}"#).unwrap();
        assert_eq!(config.address, BOB);
        assert_eq!(config.max_transfer, DEFAULT_MAX_TRANSFER);
        assert_eq!(config.buffer_capacity, MAX_BUFFER_SIZE);
    }
}
