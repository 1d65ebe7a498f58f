//! Clicker keys and the decoded key press a frame reader produces.

use std::fmt;

/// Keys of a clicker remote, by their wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Forward,
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    Reverse,
    /// Frame carried no key
    None,
}

impl Key {
    pub fn from_code(code: u8) -> Option<Self> {
        let key = match code {
            0 => Self::Forward,
            1 => Self::A,
            2 => Self::B,
            3 => Self::C,
            4 => Self::D,
            5 => Self::E,
            6 => Self::F,
            7 => Self::G,
            8 => Self::H,
            9 => Self::I,
            10 => Self::J,
            11 => Self::Reverse,
            12 => Self::None,
            _ => return Option::None,
        };
        Some(key)
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Forward => 0,
            Self::A => 1,
            Self::B => 2,
            Self::C => 3,
            Self::D => 4,
            Self::E => 5,
            Self::F => 6,
            Self::G => 7,
            Self::H => 8,
            Self::I => 9,
            Self::J => 10,
            Self::Reverse => 11,
            Self::None => 12,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One decoded frame: which remote sent which key, plus the raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPress {
    pub remote_id: u32,
    pub key: Key,
    pub frame: Vec<u8>,
}

/// First byte of a frame in the checksummed layout
pub const FRAME_SYNC: u8 = 0xAA;

// sync + remote id + key
const FRAME_HEADER_LEN: usize = 6;

/// Decoder for the plain checksummed layout:
///
/// `[0xAA] [remote id, u32 LE] [key code] [reserved ..] [xor of all previous bytes]`
///
/// Frames of any length of at least seven bytes are accepted; reserved bytes
/// only count towards the checksum.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumInspector;

impl ChecksumInspector {
    pub fn decode(frame: &[u8]) -> Option<(u32, Key)> {
        let (&check, body) = frame.split_last()?;
        if body.len() < FRAME_HEADER_LEN || body[0] != FRAME_SYNC {
            return Option::None;
        }
        if body.iter().fold(0u8, |acc, b| acc ^ b) != check {
            return Option::None;
        }

        let remote_id = u32::from_le_bytes([body[1], body[2], body[3], body[4]]);
        Key::from_code(body[5]).map(|key| (remote_id, key))
    }
}

#[cfg(test)]
pub(crate) fn encode_frame(remote_id: u32, key: Key, len: usize) -> Vec<u8> {
    let mut frame = vec![0; len];
    frame[0] = FRAME_SYNC;
    frame[1..5].copy_from_slice(&remote_id.to_le_bytes());
    frame[5] = key.code();
    frame[len - 1] = frame[..len - 1].iter().fold(0u8, |acc, b| acc ^ b);
    frame
}
