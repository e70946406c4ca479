//! TWIP wire format
//!
//! This module provides the fragment header, flag bitfields, checksum and
//! frame codec shared by the sending and receiving sides of the engine.

mod codec;
mod error;
mod header;
mod message;
pub(crate) mod metrics;
mod types;

pub use codec::{Fragment, encode_frame, fragment_count, max_chunk};
pub use error::{Error, Result};
pub use header::{FragmentHeader, checksum};
pub use message::Message;
pub use metrics::StatsSnapshot;
pub use types::{Flag, Fragmentation};

/// Header size in bytes (sender, flag, opcode, id, checksum x2, length)
pub const HEADER_SIZE: usize = 7;

/// Frames are zero-padded to a multiple of this many bytes on the wire
pub const FRAME_ALIGNMENT: usize = 4;

/// Smallest frame accepted by ingest: the header rounded up to the alignment
pub const MIN_FRAME_SIZE: usize = (HEADER_SIZE + FRAME_ALIGNMENT - 1) & !(FRAME_ALIGNMENT - 1);

/// Largest TTL a partially reassembled message can reach before it is dropped
pub const MAX_TTL: u8 = 0x0F;

/// Largest usable ring buffer capacity (one extra slot is the sentinel)
pub const MAX_BUFFER_SIZE: usize = 254;

/// Largest payload a single fragment can describe
pub const MAX_FRAGMENT_PAYLOAD: usize = MAX_BUFFER_SIZE - HEADER_SIZE;

/// Highest valid 7-bit bus address
pub const MAX_ADDRESS: u8 = 0x7F;

/// Transfer limit of the classic TWI driver buffer
pub const DEFAULT_MAX_TRANSFER: usize = 32;

/// Round `len` up to the next frame alignment boundary.
#[must_use]
pub const fn align_up(len: usize) -> usize {
    (len + FRAME_ALIGNMENT - 1) & !(FRAME_ALIGNMENT - 1)
}
