//! TWIP error types

use thiserror::Error;

use crate::transport::BusStatus;

/// TWIP protocol errors
///
/// Every variant except the configuration ones describes a best-effort drop:
/// the engine never panics or blocks, it reports what was lost and why.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Frame shorter than the aligned minimum header
    #[error("frame too short: need at least {min} bytes, got {got}")]
    FrameTooShort {
        /// Minimum frame size
        min: usize,
        /// Received frame size
        got: usize,
    },

    /// Frame length is not a multiple of the 4-byte frame alignment
    #[error("misaligned frame: {got} bytes is not a multiple of 4")]
    Misaligned {
        /// Received frame size
        got: usize,
    },

    /// Frame ends before the payload its header announces
    #[error("truncated frame: header announces {needed} bytes, got {got}")]
    Truncated {
        /// Header plus announced payload
        needed: usize,
        /// Received frame size
        got: usize,
    },

    /// Fragmentation bits outside the closed set of states
    #[error("invalid fragmentation bits in flag {flag:#04x}")]
    InvalidFragmentation {
        /// Raw flag byte
        flag: u8,
    },

    /// Header checksum mismatch
    #[error("checksum mismatch: expected {expected:#06x}, got {found:#06x}")]
    ChecksumMismatch {
        /// Checksum recomputed from the header
        expected: u16,
        /// Checksum carried by the frame
        found: u16,
    },

    /// Not enough free space in the receive ring buffer
    #[error("receive buffer full: need {needed} bytes, {free} free")]
    BufferFull {
        /// Bytes required to store the record
        needed: usize,
        /// Free bytes in the ring buffer
        free: usize,
    },

    /// Payload needs more fragments than a message can describe
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Payload size
        size: usize,
        /// Maximum allowed
        max: usize,
    },

    /// Bus transmission of the final fragment failed
    #[error("bus transmit of fragment {fragment}/{fragments} to {address:#04x} failed: {status}")]
    Bus {
        /// Status reported by the bus driver
        status: BusStatus,
        /// Destination address
        address: u8,
        /// Index of the failed fragment (1-based)
        fragment: usize,
        /// Total fragments of the message
        fragments: usize,
    },

    /// Bus driver failed to come up
    #[error("bus initialization failed: {status}")]
    BusInit {
        /// Status reported by the bus driver
        status: BusStatus,
    },

    /// Bus address outside the 7-bit range
    #[error("invalid bus address {address:#04x} (max {max:#04x})")]
    InvalidAddress {
        /// Offending address
        address: u8,
        /// Highest valid address
        max: u8,
    },

    /// Engine configuration rejected
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
