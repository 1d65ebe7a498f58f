//! Blocking single-byte serial reader with a configurable timeout.

use serde::{Deserialize, Serialize};
use serialport::{DataBits, Parity, SerialPort, StopBits};
use std::io::{self, Read};
use std::time::Duration;
use tracing::{debug, info};

/// Line settings used when opening a serial device
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Device path, e.g. `/dev/ttyUSB0`. Serial input is disabled when unset.
    pub port: Option<String>,

    pub baud_rate: u32,

    /// Initial read timeout
    pub read_timeout_ms: u64,

    /// Length of one frame for the frame reader
    pub frame_len: usize,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 19_200,
            read_timeout_ms: 100,
            frame_len: 10,
        }
    }
}

/// Serial channel errors
#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Failed to open serial device {path}: {source}")]
    OpenFailed {
        path: String,
        source: serialport::Error,
    },

    #[error("No byte received within {0:?}")]
    Timeout(Duration),

    #[error("Serial I/O failure: {0}")]
    IoFailure(#[from] io::Error),
}

/// An open serial device and its read timeout.
///
/// Closing consumes the channel, so a device can only be closed once.
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
    timeout: Duration,
}

impl SerialChannel {
    /// Opens `path` with the default line settings (19200 8N1).
    pub fn open(path: &str) -> Result<Self, SerialError> {
        Self::open_with(path, &SerialSettings::default())
    }

    pub fn open_with(path: &str, settings: &SerialSettings) -> Result<Self, SerialError> {
        let timeout = Duration::from_millis(settings.read_timeout_ms);
        debug!(
            "Opening serial device {} at {} baud, timeout {:?}",
            path, settings.baud_rate, timeout
        );

        let port = serialport::new(path, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(timeout)
            .open()
            .map_err(|source| SerialError::OpenFailed {
                path: path.to_string(),
                source,
            })?;

        info!("Serial device {} opened", path);
        Ok(Self { port, timeout })
    }

    /// Wraps an already opened port.
    pub fn from_port(port: Box<dyn SerialPort>) -> Self {
        let timeout = port.timeout();
        Self { port, timeout }
    }

    /// Sets the maximum wait of subsequent reads.
    pub fn set_timeout(&mut self, millis: u64) -> Result<(), SerialError> {
        let timeout = Duration::from_millis(millis);
        self.port.set_timeout(timeout).map_err(io::Error::from)?;
        self.timeout = timeout;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn name(&self) -> Option<String> {
        self.port.name()
    }

    /// Blocks until one byte arrives or the timeout elapses.
    pub fn read_byte(&mut self) -> Result<u8, SerialError> {
        let mut buf = [0u8; 1];
        match self.port.read(&mut buf) {
            Ok(1) => Ok(buf[0]),
            Ok(_) => Err(SerialError::Timeout(self.timeout)),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                Err(SerialError::Timeout(self.timeout))
            }
            Err(e) => Err(SerialError::IoFailure(e)),
        }
    }

    pub fn close(self) {
        debug!(
            "Closing serial device {}",
            self.name().unwrap_or_else(|| "<unnamed>".to_string())
        );
    }
}
