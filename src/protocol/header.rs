//! TWIP fragment header
//!
//! The header is 7 bytes and precedes every fragment's payload, on the wire
//! and inside the receive ring buffer.

use super::{Error, Flag, HEADER_SIZE, Result};

/// Header checksum over (sender, flag, opcode, id, payload length).
///
/// `sender` and `opcode` form one 16-bit half, `flag + length` and `id` the
/// other; the halves are summed and the sum complemented, all with 16-bit
/// wraparound. Detects transmission errors only.
#[must_use]
pub const fn checksum(sender: u8, flag: u8, opcode: u8, id: u8, len: u8) -> u16 {
    let high = ((sender as u16) << 8).wrapping_add(opcode as u16);
    let low = ((flag as u16).wrapping_add(len as u16) << 8).wrapping_add(id as u16);
    !high.wrapping_add(low)
}

/// TWIP fragment header (7 bytes)
///
/// # Wire Format
///
/// ```text
/// +--------+--------+--------+--------+--------+--------+--------+
/// | sender |  flag  | opcode |   id   | csum_h | csum_l |  len   |
/// +--------+--------+--------+--------+--------+--------+--------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    sender: u8,
    flag: Flag,
    opcode: u8,
    id: u8,
    checksum: u16,
    payload_len: u8,
}

impl FragmentHeader {
    /// Create a header and compute its checksum
    #[must_use]
    pub const fn new(sender: u8, flag: Flag, opcode: u8, id: u8, payload_len: u8) -> Self {
        Self {
            sender,
            flag,
            opcode,
            id,
            checksum: checksum(sender, flag.as_u8(), opcode, id, payload_len),
            payload_len,
        }
    }

    /// Sender address
    #[must_use]
    pub const fn sender(&self) -> u8 {
        self.sender
    }

    /// Flag byte
    #[must_use]
    pub const fn flag(&self) -> Flag {
        self.flag
    }

    /// Opcode
    #[must_use]
    pub const fn opcode(&self) -> u8 {
        self.opcode
    }

    /// Logical message id
    #[must_use]
    pub const fn id(&self) -> u8 {
        self.id
    }

    /// Checksum carried by the header
    #[must_use]
    pub const fn checksum(&self) -> u16 {
        self.checksum
    }

    /// Payload length of this fragment
    #[must_use]
    pub const fn payload_len(&self) -> u8 {
        self.payload_len
    }

    /// Checksum recomputed from the other header fields
    #[must_use]
    pub const fn expected_checksum(&self) -> u16 {
        checksum(
            self.sender,
            self.flag.as_u8(),
            self.opcode,
            self.id,
            self.payload_len,
        )
    }

    /// Validate checksum and fragmentation bits
    pub fn validate(&self) -> Result<()> {
        let expected = self.expected_checksum();
        if self.checksum != expected {
            return Err(Error::ChecksumMismatch {
                expected,
                found: self.checksum,
            });
        }

        if self.flag.fragmentation().is_none() {
            return Err(Error::InvalidFragmentation {
                flag: self.flag.as_u8(),
            });
        }

        Ok(())
    }

    /// Convert to bytes (checksum big-endian)
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let [csum_high, csum_low] = self.checksum.to_be_bytes();
        [
            self.sender,
            self.flag.as_u8(),
            self.opcode,
            self.id,
            csum_high,
            csum_low,
            self.payload_len,
        ]
    }

    /// Parse from bytes without validating
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let Some(raw) = bytes.first_chunk::<HEADER_SIZE>() else {
            return Err(Error::FrameTooShort {
                min: HEADER_SIZE,
                got: bytes.len(),
            });
        };

        Ok(Self {
            sender: raw[0],
            flag: Flag::from_u8(raw[1]),
            opcode: raw[2],
            id: raw[3],
            checksum: u16::from_be_bytes([raw[4], raw[5]]),
            payload_len: raw[6],
        })
    }
}
