//! TWIP engine, receive buffer, and bus collaborators

mod buffer;
mod bus;
#[cfg(feature = "debug-tools")]
mod debug;
mod engine;
mod loopback;

pub use buffer::RingBuffer;
pub use bus::{Bus, BusStatus, ReceiveCallback};
#[cfg(feature = "debug-tools")]
pub use debug::{Direction, PcapRecorder};
pub use engine::{DropReason, Engine, EngineConfig, ReceiveOutcome, SendReport};
pub use loopback::{BusHub, LoopbackBus, Transfer};
