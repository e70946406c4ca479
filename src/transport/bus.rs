//! Contract between the protocol engine and a two-wire bus driver.

use std::fmt;
use std::sync::Arc;

/// Outcome of a bus operation, as reported by the classic TWI driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusStatus {
    /// Transfer completed
    Ok,
    /// Frame longer than the driver's transfer buffer
    TooLong,
    /// Address sent, NACK received
    AddressNack,
    /// Data sent, NACK received
    DataNack,
    /// Any other driver error code
    Other(u8),
}

impl BusStatus {
    /// Convert from a driver return code
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::TooLong,
            2 => Self::AddressNack,
            3 => Self::DataNack,
            other => Self::Other(other),
        }
    }

    /// Convert to a driver return code
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::TooLong => 1,
            Self::AddressNack => 2,
            Self::DataNack => 3,
            Self::Other(code) => code,
        }
    }

    /// Check if the transfer succeeded
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for BusStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::TooLong => write!(f, "length too long for buffer"),
            Self::AddressNack => write!(f, "address sent, NACK received"),
            Self::DataNack => write!(f, "data sent, NACK received"),
            Self::Other(code) => write!(f, "other bus error ({code})"),
        }
    }
}

/// Slave-receive notification: invoked with each raw frame addressed to us.
///
/// Runs while the bus is held, so implementations must return quickly and
/// never block.
pub type ReceiveCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Bus driver collaborator.
///
/// The engine calls these; it implements none of them. A driver that can
/// deliver frames from another thread or an interrupt context must be `Send`.
pub trait Bus {
    /// Bring the bus hardware up.
    fn initialize(&mut self) -> BusStatus;

    /// Set the address this node answers to as a slave.
    fn set_own_address(&mut self, address: u8);

    /// Install the slave-receive notification.
    fn register_receive_callback(&mut self, callback: ReceiveCallback);

    /// Transmit one frame to `address` as bus master.
    fn transmit(&mut self, address: u8, frame: &[u8]) -> BusStatus;
}

impl<B: Bus + ?Sized> Bus for Box<B> {
    fn initialize(&mut self) -> BusStatus {
        (**self).initialize()
    }

    fn set_own_address(&mut self, address: u8) {
        (**self).set_own_address(address);
    }

    fn register_receive_callback(&mut self, callback: ReceiveCallback) {
        (**self).register_receive_callback(callback);
    }

    fn transmit(&mut self, address: u8, frame: &[u8]) -> BusStatus {
        (**self).transmit(address, frame)
    }
}
