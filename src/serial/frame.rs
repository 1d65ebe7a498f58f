//! Fixed-length frame reader for serial receivers such as a clicker base
//! station.
//!
//! The receiver streams frames of a fixed length with no delimiter. Decoding
//! into a remote id and [`Key`] is left to a [`FrameInspector`], either a
//! vendor decoder or [`ChecksumInspector`]. When a frame does not decode, the
//! reader assumes it lost alignment and slides the window forward one byte at
//! a time until it decodes again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use super::channel::{SerialChannel, SerialError};
use super::keys::{ChecksumInspector, Key, KeyPress};

/// Anything that yields single bytes with timeout semantics.
pub trait ByteSource {
    fn read_byte(&mut self) -> Result<u8, SerialError>;
}

impl ByteSource for SerialChannel {
    fn read_byte(&mut self) -> Result<u8, SerialError> {
        SerialChannel::read_byte(self)
    }
}

/// Decodes one complete frame into `(remote_id, key)`, or returns `None`
/// when it is not valid.
pub trait FrameInspector {
    fn inspect(&self, frame: &[u8]) -> Option<(u32, Key)>;
}

impl<F> FrameInspector for F
where
    F: Fn(&[u8]) -> Option<(u32, Key)>,
{
    fn inspect(&self, frame: &[u8]) -> Option<(u32, Key)> {
        self(frame)
    }
}

impl FrameInspector for ChecksumInspector {
    fn inspect(&self, frame: &[u8]) -> Option<(u32, Key)> {
        ChecksumInspector::decode(frame)
    }
}

pub struct FrameReader<S, I> {
    source: S,
    inspector: I,
    frame: Vec<u8>,
    running: Arc<AtomicBool>,
}

impl<S: ByteSource, I: FrameInspector> FrameReader<S, I> {
    pub fn new(source: S, inspector: I, frame_len: usize) -> Self {
        Self {
            source,
            inspector,
            frame: vec![0; frame_len.max(1)],
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Flag that keeps the reader retrying on timeouts. Clearing it makes the
    /// current and all later reads return `Ok(None)`.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Raw bytes of the most recently read frame.
    pub fn last_frame(&self) -> &[u8] {
        &self.frame
    }

    /// Reads and decodes the next key press.
    ///
    /// Timeouts are retried while the reader is running; any other serial
    /// error is returned. Returns `Ok(None)` once stopped.
    pub fn read_frame(&mut self) -> Result<Option<KeyPress>, SerialError> {
        for i in 0..self.frame.len() {
            match self.next_byte()? {
                Some(byte) => self.frame[i] = byte,
                None => return Ok(None),
            }
        }
        debug!("Received frame: {:02x?}", self.frame);

        loop {
            if let Some((remote_id, key)) = self.inspector.inspect(&self.frame) {
                return Ok(Some(KeyPress {
                    remote_id,
                    key,
                    frame: self.frame.clone(),
                }));
            }

            trace!("Frame rejected, resynchronizing");
            let Some(byte) = self.next_byte()? else {
                return Ok(None);
            };
            self.frame.rotate_left(1);
            if let Some(last) = self.frame.last_mut() {
                *last = byte;
            }
        }
    }

    fn next_byte(&mut self) -> Result<Option<u8>, SerialError> {
        while self.is_running() {
            match self.source.read_byte() {
                Ok(byte) => return Ok(Some(byte)),
                Err(SerialError::Timeout(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}
