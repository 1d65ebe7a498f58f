//! Driver capability surface consumed by the controller session.
//!
//! Discovery, the radio transport and LED/rumble control belong to the
//! driver. The session only sees the operations of [`ControllerDriver`] and
//! borrows [`DeviceHandle`]s out of the driver's own storage.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::buttons::ButtonMask;

/// Number of controller slots in every pool.
pub const MAX_CONTROLLERS: usize = 7;

/// Position of a handle inside a [`ControllerPool`]. Stable for the lifetime
/// of the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotIndex(pub usize);

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

/// Identifier the driver assigns to a physical controller.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ControllerId(pub u32);

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connected,
}

/// Kind of the event pending on a handle after a poll step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EventKind {
    #[default]
    None,
    /// Button state changed; the handle's mask holds the new state.
    Button,
    Status,
    Motion,
    Disconnect,
    Other,
}

/// Indicator lights shown when a controller has been connected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorPattern {
    #[default]
    Led1,
    Led2,
    Led3,
    Led4,
    Off,
}

/// Errors reported by driver feedback operations
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Operation not supported by driver: {0}")]
    Unsupported(&'static str),

    #[error("Device in {0} is not connected")]
    Disconnected(SlotIndex),

    #[error("Driver backend error: {0}")]
    Backend(String),
}

/// One physical controller slot, owned by the driver.
#[derive(Clone, Debug, Default)]
pub struct DeviceHandle {
    pub id: ControllerId,
    pub status: ConnectionStatus,
    pub event: EventKind,
    pub buttons: ButtonMask,
    pub address: String,
}

impl DeviceHandle {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Button mask of the pending event, if the pending event is a button event.
    pub fn button_event(&self) -> Option<(ControllerId, ButtonMask)> {
        match self.event {
            EventKind::Button => Some((self.id, self.buttons)),
            _ => None,
        }
    }
}

/// Fixed-capacity arena of controller slots.
///
/// A pool is a token issued by [`ControllerDriver::allocate`] and handed back
/// to [`ControllerDriver::cleanup`], which consumes it. The device state
/// behind each slot stays inside the driver.
#[derive(Debug, PartialEq, Eq)]
pub struct ControllerPool {
    capacity: usize,
}

impl ControllerPool {
    /// Creates a pool token. Intended for driver implementations.
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// All slot indices of the pool in ascending order.
    pub fn slots(&self) -> impl Iterator<Item = SlotIndex> {
        (0..self.capacity).map(SlotIndex)
    }
}

/// Device discovery, connection and polling as provided by a controller
/// driver.
pub trait ControllerDriver {
    /// Prepares `capacity` empty slots and returns the pool token for them.
    fn allocate(&mut self, capacity: usize) -> ControllerPool;

    /// Searches for controllers for at most `max_wait`. Returns the number of
    /// discovered devices. Failures are reported as zero.
    fn find(&mut self, pool: &ControllerPool, max_wait: Duration) -> usize;

    /// Connects the first `found` discovered devices. Returns how many
    /// connections were established.
    fn connect_all(&mut self, pool: &ControllerPool, found: usize) -> usize;

    fn is_connected(&self, slot: SlotIndex) -> bool;

    fn set_indicator(&mut self, slot: SlotIndex, pattern: IndicatorPattern)
        -> Result<(), DriverError>;

    fn set_rumble(&mut self, slot: SlotIndex, on: bool) -> Result<(), DriverError>;

    /// Non-blocking poll step. Refreshes the pending event of every handle
    /// and returns whether any new data arrived.
    fn poll_once(&mut self, pool: &ControllerPool) -> bool;

    fn handle(&self, slot: SlotIndex) -> Option<&DeviceHandle>;

    /// Disconnects every device and frees the pool.
    fn cleanup(&mut self, pool: ControllerPool);
}
