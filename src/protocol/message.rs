//! TWIP logical message (reassembly result)

use bytes::Bytes;

use super::{Flag, Fragmentation, checksum};

/// Logical message reassembled from one or more fragments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    sender: u8,
    flag: Flag,
    opcode: u8,
    id: u8,
    checksum: u16,
    complete: bool,
    payload: Bytes,
}

impl Message {
    /// Empty, incomplete message returned when nothing could be reassembled
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a message from reassembled header fields and payload.
    ///
    /// The checksum is recomputed over the aggregate header with the size
    /// truncated to the one-byte length field.
    #[must_use]
    pub fn from_parts(
        sender: u8,
        flag: Flag,
        opcode: u8,
        id: u8,
        payload: Bytes,
        complete: bool,
    ) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let size_byte = payload.len() as u8;
        Self {
            sender,
            flag,
            opcode,
            id,
            checksum: checksum(sender, flag.as_u8(), opcode, id, size_byte),
            complete,
            payload,
        }
    }

    /// Sender address
    #[must_use]
    pub const fn sender(&self) -> u8 {
        self.sender
    }

    /// Final flag (`END` for a reassembled multi-fragment message)
    #[must_use]
    pub const fn flag(&self) -> Flag {
        self.flag
    }

    /// Final fragmentation state
    #[must_use]
    pub const fn fragmentation(&self) -> Option<Fragmentation> {
        self.flag.fragmentation()
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

    /// Checksum over the aggregate header
    #[must_use]
    pub const fn checksum(&self) -> u16 {
        self.checksum
    }

    /// Total payload size
    #[must_use]
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Whether every fragment of the message was received
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    /// Get payload
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Take ownership of the payload
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}
