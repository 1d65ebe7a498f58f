//! Host-side access to wireless controllers and serial input devices.
//!
//! - [`controller`] - controller session: discovery, connect feedback and a
//!   paced poll loop dispatching button events to a callback
//! - [`serial`] - blocking serial byte reader with timeout, plus a
//!   fixed-length frame reader
//! - [`config`] - TOML configuration for both

pub mod config;
pub mod controller;
pub mod serial;
