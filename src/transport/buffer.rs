//! Byte-granular ring buffer holding received fragment records.

use crate::protocol::MAX_BUFFER_SIZE;

/// Fixed-capacity FIFO of bytes with non-destructive lookahead.
///
/// One storage slot more than the usable capacity is allocated so that a
/// full buffer (`write + 1 == read`) is distinguishable from an empty one
/// (`write == read`).
#[derive(Debug, Clone)]
pub struct RingBuffer {
    slots: Box<[u8]>,
    read: usize,
    write: usize,
}

impl RingBuffer {
    /// Create a ring buffer; `capacity` is clamped to 254.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(MAX_BUFFER_SIZE);
        Self {
            slots: vec![0u8; capacity + 1].into_boxed_slice(),
            read: 0,
            write: 0,
        }
    }

    /// Re-initialize with a new capacity, discarding all contents.
    pub fn init(&mut self, capacity: usize) {
        *self = Self::new(capacity);
    }

    /// Discard all contents, keeping the capacity.
    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
    }

    /// Usable capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    fn advance(&self, cursor: usize) -> usize {
        (cursor + 1) % self.slots.len()
    }

    /// Check whether the buffer holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    /// Check whether no further byte can be written.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.advance(self.write) == self.read
    }

    /// Number of bytes currently stored.
    #[must_use]
    pub fn occupied(&self) -> usize {
        if self.write >= self.read {
            self.write - self.read
        } else {
            self.slots.len() - self.read + self.write
        }
    }

    /// Number of bytes that can still be written.
    #[must_use]
    pub fn free_space(&self) -> usize {
        self.capacity() - self.occupied()
    }

    /// Append one byte; returns `false` and discards it when full.
    pub fn write(&mut self, byte: u8) -> bool {
        if self.is_full() {
            return false;
        }

        self.slots[self.write] = byte;
        self.write = self.advance(self.write);
        true
    }

    /// Append all of `bytes` or none of them.
    pub fn write_slice(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.free_space() {
            return false;
        }

        for &byte in bytes {
            self.slots[self.write] = byte;
            self.write = self.advance(self.write);
        }
        true
    }

    /// Remove and return the oldest byte, `None` when empty.
    pub fn read(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }

        let byte = self.slots[self.read];
        self.read = self.advance(self.read);
        Some(byte)
    }

    /// Byte `offset` positions past the read cursor, without consuming it.
    ///
    /// Offsets beyond the stored bytes wrap into stale storage; callers
    /// check `occupied()` first when that matters.
    #[must_use]
    pub fn peek(&self, offset: usize) -> u8 {
        self.slots[(self.read + offset) % self.slots.len()]
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new(MAX_BUFFER_SIZE)
    }
}
