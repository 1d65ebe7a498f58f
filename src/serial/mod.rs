//! Serial device input
//!
//! - [`channel`] - open/read/close of a serial device with a read timeout
//! - [`frame`] - fixed-length frame reader with resynchronization on top of
//!   any [`ByteSource`]
//! - [`keys`] - clicker keys, decoded [`KeyPress`] and the checksummed frame
//!   layout
//!
//! The serial side shares nothing with the controller subsystem.

pub mod channel;
pub mod frame;
pub mod keys;

pub use channel::{SerialChannel, SerialError, SerialSettings};
pub use frame::{ByteSource, FrameInspector, FrameReader};
pub use keys::{ChecksumInspector, Key, KeyPress};
