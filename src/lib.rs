//! TWIP (Two-Wire Interface Protocol) - message fragmentation and reassembly
//! for small-transfer two-wire buses
//!
//! A bus transaction on a classic TWI/I2C peripheral moves at most a few
//! dozen bytes. TWIP splits larger application messages into checksummed
//! fragments, stores validated fragments in a small ring buffer as they
//! arrive, and reassembles them in arrival order. Incomplete messages are
//! requeued with a time-to-live counter and dropped once it reaches 15.
//!
//! # Quick Start
//!
//! ```rust
//! use twip::transport::{BusHub, Engine, EngineConfig};
//!
//! // Two nodes sharing one in-process bus
//! let hub = BusHub::new();
//! let alice = Engine::new(EngineConfig::new(0x10), hub.attach())?;
//! let bob = Engine::new(EngineConfig::new(0x20), hub.attach())?;
//!
//! // 60 bytes do not fit one 32-byte transaction: sent as three fragments
//! let report = alice.send(0x20, 0x02, &[0xAA; 60])?;
//! assert_eq!(report.fragments, 3);
//!
//! let message = bob.receive();
//! assert!(message.is_complete());
//! assert_eq!(message.sender(), 0x10);
//! assert_eq!(message.payload().as_ref(), &[0xAA; 60]);
//! # Ok::<(), twip::Error>(())
//! ```
//!
//! # Features
//!
//! - **Fragmentation** - payloads split to fit the bus transfer limit
//! - **Header checksum** - corrupted or truncated fragments never enter the buffer
//! - **TTL-bounded reassembly** - partial messages age out instead of blocking
//! - **Explicit outcomes** - every silent drop is also reported as a value

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod protocol;
pub mod transport;

pub use protocol::{
    Error, Flag, Fragmentation, HEADER_SIZE, MAX_TTL, Message, Result, StatsSnapshot,
};
pub use transport::{Bus, BusStatus, Engine, EngineConfig, ReceiveOutcome, RingBuffer};

/// TWIP protocol version
pub const VERSION: &str = "0.2.0";
