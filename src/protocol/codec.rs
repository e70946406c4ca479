//! TWIP frame codec (encode/parse)
//!
//! A frame is a header, its payload slice, and zero padding up to the next
//! 4-byte boundary. Padding is never counted in the header's length field.

use bytes::{BufMut, Bytes, BytesMut};

use super::{
    Error, FRAME_ALIGNMENT, FragmentHeader, HEADER_SIZE,
    MAX_FRAGMENT_PAYLOAD, MIN_FRAME_SIZE, Result, align_up,
};

/// Largest payload slice per fragment for a bus transfer limit.
///
/// The limit is rounded down to the frame alignment first so that a padded
/// frame never exceeds one transaction. Returns 0 when not even a header fits.
#[must_use]
pub const fn max_chunk(max_transfer: usize) -> usize {
    let aligned = max_transfer & !(FRAME_ALIGNMENT - 1);
    if aligned <= HEADER_SIZE {
        return 0;
    }
    let chunk = aligned - HEADER_SIZE;
    if chunk > MAX_FRAGMENT_PAYLOAD {
        MAX_FRAGMENT_PAYLOAD
    } else {
        chunk
    }
}

/// Number of fragments needed for `len` payload bytes; an empty payload still
/// takes one fragment.
#[must_use]
pub const fn fragment_count(len: usize, chunk: usize) -> usize {
    if len == 0 || chunk == 0 {
        1
    } else {
        len.div_ceil(chunk)
    }
}

/// Encode one frame
///
/// # Format
///
/// ```text
/// [HEADER (7 bytes)] [PAYLOAD (len)] [ZERO PADDING (to 4)]
/// ```
#[must_use]
pub fn encode_frame(header: &FragmentHeader, payload: &[u8]) -> Bytes {
    debug_assert_eq!(usize::from(header.payload_len()), payload.len());

    let total = align_up(HEADER_SIZE + payload.len());
    let mut frame = BytesMut::with_capacity(total);
    frame.put_slice(&header.to_bytes());
    frame.put_slice(payload);
    frame.put_bytes(0, total - frame.len());
    frame.freeze()
}

/// Borrowed view of one validated frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment<'a> {
    header: FragmentHeader,
    payload: &'a [u8],
}

impl<'a> Fragment<'a> {
    /// Parse and validate a raw frame as delivered by the bus.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The frame is shorter than the aligned minimum header
    /// - The frame length is not a multiple of 4
    /// - The header announces more than 247 payload bytes
    /// - The frame ends before the announced payload
    /// - The fragmentation bits are invalid
    /// - The checksum doesn't match
    pub fn parse(raw: &'a [u8]) -> Result<Self> {
        if raw.len() < MIN_FRAME_SIZE {
            return Err(Error::FrameTooShort {
                min: MIN_FRAME_SIZE,
                got: raw.len(),
            });
        }

        if raw.len() % FRAME_ALIGNMENT != 0 {
            return Err(Error::Misaligned { got: raw.len() });
        }

        let header = FragmentHeader::from_bytes(raw)?;
        let payload_len = usize::from(header.payload_len());
        if payload_len > MAX_FRAGMENT_PAYLOAD {
            return Err(Error::PayloadTooLarge {
                size: payload_len,
                max: MAX_FRAGMENT_PAYLOAD,
            });
        }

        let needed = HEADER_SIZE + payload_len;
        if raw.len() < needed {
            return Err(Error::Truncated {
                needed,
                got: raw.len(),
            });
        }

        header.validate()?;

        Ok(Self {
            header,
            payload: &raw[HEADER_SIZE..needed],
        })
    }

    /// Fragment header
    #[must_use]
    pub const fn header(&self) -> &FragmentHeader {
        &self.header
    }

    /// Payload slice, padding excluded
    #[must_use]
    pub const fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Header plus payload bytes, the value stored as a record's length prefix
    #[must_use]
    pub const fn record_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}
