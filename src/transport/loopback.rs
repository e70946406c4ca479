//! In-process bus shared by several nodes.
//!
//! `BusHub` plays the role of the physical wires: every `LoopbackBus`
//! attached to it can address the others by their 7-bit address. Frames are
//! delivered synchronously to the receiver's callback from inside
//! `transmit`, the same way a slave-receive interrupt fires while the master
//! still holds the bus.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tracing::trace;

use super::bus::{Bus, BusStatus, ReceiveCallback};
use crate::protocol::DEFAULT_MAX_TRANSFER;

/// One frame observed on the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    /// Address of the transmitting node, if it has one
    pub from: Option<u8>,
    /// Destination address
    pub to: u8,
    /// Frame bytes as put on the wire
    pub frame: Bytes,
    /// Whether the frame reached the destination's callback
    pub delivered: bool,
}

/// Shared wires connecting loopback nodes.
#[derive(Clone)]
pub struct BusHub {
    inner: Arc<Mutex<HubInner>>,
}

struct HubInner {
    nodes: HashMap<u8, ReceiveCallback>,
    max_transfer: usize,
    delivery: bool,
    faults: VecDeque<BusStatus>,
    transfers: Vec<Transfer>,
}

impl BusHub {
    /// Create a hub with the classic 32-byte transfer limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_transfer(DEFAULT_MAX_TRANSFER)
    }

    /// Create a hub with a custom per-transaction limit.
    #[must_use]
    pub fn with_max_transfer(max_transfer: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner {
                nodes: HashMap::new(),
                max_transfer,
                delivery: true,
                faults: VecDeque::new(),
                transfers: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a node attached to this hub.
    #[must_use]
    pub fn attach(&self) -> LoopbackBus {
        LoopbackBus {
            hub: self.clone(),
            address: None,
            callback: None,
            initialized: false,
        }
    }

    /// Per-transaction limit in bytes.
    #[must_use]
    pub fn max_transfer(&self) -> usize {
        self.lock().max_transfer
    }

    /// Enable or disable delivery. While disabled, frames are acknowledged
    /// and recorded but never reach the receiver.
    pub fn set_delivery(&self, enabled: bool) {
        self.lock().delivery = enabled;
    }

    /// Make the next transmit fail with `status` without touching the wires.
    pub fn fail_next(&self, status: BusStatus) {
        self.lock().faults.push_back(status);
    }

    /// Every transfer accepted so far, in order.
    #[must_use]
    pub fn transfers(&self) -> Vec<Transfer> {
        self.lock().transfers.clone()
    }

    /// Forget recorded transfers.
    pub fn clear_transfers(&self) {
        self.lock().transfers.clear();
    }

    /// Addresses with a registered receiver.
    #[must_use]
    pub fn addresses(&self) -> Vec<u8> {
        let mut addresses: Vec<u8> = self.lock().nodes.keys().copied().collect();
        addresses.sort_unstable();
        addresses
    }

    fn register(&self, address: u8, callback: ReceiveCallback) {
        self.lock().nodes.insert(address, callback);
    }

    fn unregister(&self, address: u8) {
        self.lock().nodes.remove(&address);
    }

    fn transmit(&self, from: Option<u8>, to: u8, frame: &[u8]) -> BusStatus {
        let callback = {
            let mut inner = self.lock();
            if let Some(status) = inner.faults.pop_front() {
                trace!(to, %status, "injected bus fault");
                return status;
            }
            if frame.len() > inner.max_transfer {
                return BusStatus::TooLong;
            }
            let Some(callback) = inner.nodes.get(&to).cloned() else {
                return BusStatus::AddressNack;
            };
            let delivered = inner.delivery;
            inner.transfers.push(Transfer {
                from,
                to,
                frame: Bytes::copy_from_slice(frame),
                delivered,
            });
            delivered.then_some(callback)
        };

        // Lock released: the receiver may transmit from its callback.
        if let Some(callback) = callback {
            callback(frame);
        }
        BusStatus::Ok
    }
}

impl Default for BusHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BusHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusHub")
            .field("addresses", &self.addresses())
            .finish_non_exhaustive()
    }
}

/// A node's connection to a `BusHub`.
pub struct LoopbackBus {
    hub: BusHub,
    address: Option<u8>,
    callback: Option<ReceiveCallback>,
    initialized: bool,
}

impl LoopbackBus {
    /// Hub this node is attached to.
    #[must_use]
    pub fn hub(&self) -> &BusHub {
        &self.hub
    }

    /// Own address, once set.
    #[must_use]
    pub fn address(&self) -> Option<u8> {
        self.address
    }

    fn publish(&self) {
        if let (true, Some(address), Some(callback)) =
            (self.initialized, self.address, self.callback.as_ref())
        {
            self.hub.register(address, Arc::clone(callback));
        }
    }
}

impl Bus for LoopbackBus {
    fn initialize(&mut self) -> BusStatus {
        self.initialized = true;
        self.publish();
        BusStatus::Ok
    }

    fn set_own_address(&mut self, address: u8) {
        if let Some(previous) = self.address.replace(address) {
            if self.initialized && previous != address {
                self.hub.unregister(previous);
            }
        }
        self.publish();
    }

    fn register_receive_callback(&mut self, callback: ReceiveCallback) {
        self.callback = Some(callback);
        self.publish();
    }

    fn transmit(&mut self, address: u8, frame: &[u8]) -> BusStatus {
        self.hub.transmit(self.address, address, frame)
    }
}

impl Drop for LoopbackBus {
    fn drop(&mut self) {
        if let (true, Some(address)) = (self.initialized, self.address) {
            self.hub.unregister(address);
        }
    }
}

impl std::fmt::Debug for LoopbackBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackBus")
            .field("address", &self.address)
            .field("initialized", &self.initialized)
            .finish_non_exhaustive()
    }
}
