//! Controller subsystem for wireless controller input
//!
//! A [`ControllerSession`] drives an external [`ControllerDriver`] through
//! two phases:
//!
//! 1. [`session`] `connect` - discovery, batch connect and feedback sequence
//! 2. [`session`] `poll_loop` - paced drain/dispatch loop until stopped
//!
//! # Architecture
//!
//! ```text
//! Driver ──► poll_once ──► DeviceHandle pool ──► ButtonCallback
//!            (drain)       (slot order)          (SessionControl)
//! ```
//!
//! The loop runs on a dedicated thread. Other threads stop it or replace the
//! callback through a cloned [`SessionControl`].

pub mod buttons;
pub mod control;
pub mod driver;
pub mod gilrs_driver;
pub mod session;

#[cfg(test)]
mod mock;

pub use buttons::{ButtonMask, ButtonType};
pub use control::{ButtonCallback, LoopStatus, SessionControl};
pub use driver::{
    ConnectionStatus, ControllerDriver, ControllerId, ControllerPool, DeviceHandle, DriverError,
    EventKind, IndicatorPattern, SlotIndex, MAX_CONTROLLERS,
};
pub use gilrs_driver::GilrsDriver;
pub use session::{Connected, ControllerSession, Idle, SessionPhase, SessionSettings};
