//! TWIP fragmentation states and flag byte

use std::fmt;

use super::MAX_TTL;

/// Fragmentation state carried in bits 0-1 of the flag byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Fragmentation {
    /// Whole message in a single fragment
    NotFragmented = 0b00,
    /// First or intermediate fragment of a set
    StartOrMiddle = 0b01,
    /// Last fragment of a set
    End = 0b11,
}

impl Fragmentation {
    /// Convert from the two low bits of a flag byte
    #[must_use]
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits & Flag::FRAGMENTATION_MASK {
            0b00 => Some(Self::NotFragmented),
            0b01 => Some(Self::StartOrMiddle),
            0b11 => Some(Self::End),
            _ => None,
        }
    }

    /// Convert to bits
    #[must_use]
    pub const fn bits(self) -> u8 {
        self as u8
    }

    /// Check whether this fragment closes a logical message
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::NotFragmented | Self::End)
    }
}

impl fmt::Display for Fragmentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFragmented => "NOT_FRAGMENTED",
            Self::StartOrMiddle => "START_OR_MIDDLE",
            Self::End => "END",
        };
        write!(f, "{name}")
    }
}

/// Packed flag byte
///
/// ```text
///  7   6   5   4   3   2   1   0
/// +---------------+-------+-------+
/// |      TTL      |  rsv  | frag  |
/// +---------------+-------+-------+
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flag(u8);

impl Flag {
    /// Fragmentation state bits
    pub const FRAGMENTATION_MASK: u8 = 0b0000_0011;
    /// Time-to-live bits
    pub const TTL_MASK: u8 = 0b1111_0000;
    /// Shift of the TTL field
    pub const TTL_SHIFT: u8 = 4;

    /// Compose a flag from a fragmentation state and a TTL (saturated at 15)
    #[must_use]
    pub const fn new(fragmentation: Fragmentation, ttl: u8) -> Self {
        let ttl = if ttl > MAX_TTL { MAX_TTL } else { ttl };
        Self((ttl << Self::TTL_SHIFT) | fragmentation.bits())
    }

    /// Wrap a raw flag byte
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        Self(value)
    }

    /// Convert to byte
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Fragmentation state, `None` for the invalid `0b10` pattern
    #[must_use]
    pub const fn fragmentation(self) -> Option<Fragmentation> {
        Fragmentation::from_bits(self.0)
    }

    /// Raw fragmentation bits
    #[must_use]
    pub const fn fragmentation_bits(self) -> u8 {
        self.0 & Self::FRAGMENTATION_MASK
    }

    /// Time-to-live counter
    #[must_use]
    pub const fn ttl(self) -> u8 {
        (self.0 & Self::TTL_MASK) >> Self::TTL_SHIFT
    }

    /// Check whether the TTL has reached its ceiling
    #[must_use]
    pub const fn ttl_exhausted(self) -> bool {
        self.ttl() >= MAX_TTL
    }

    /// Flag used when requeuing: TTL + 1, same fragmentation bits, reserved cleared
    #[must_use]
    pub const fn aged(self) -> Self {
        let ttl = self.ttl();
        let next = if ttl >= MAX_TTL { MAX_TTL } else { ttl + 1 };
        Self((next << Self::TTL_SHIFT) | self.fragmentation_bits())
    }
}

impl From<Fragmentation> for Flag {
    fn from(fragmentation: Fragmentation) -> Self {
        Self::new(fragmentation, 0)
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fragmentation() {
            Some(state) => write!(f, "{state} ttl={}", self.ttl()),
            None => write!(f, "INVALID({:#04x})", self.0),
        }
    }
}
