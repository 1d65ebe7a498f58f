//! Button identifiers and the bitmask reported with every button event.

use serde::{Deserialize, Serialize};
use std::fmt;

// Button type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ButtonType {
    A,
    B,
    X,
    Y,
    Start,
    Select,
    LeftBumper,
    RightBumper,
    LeftStick,
    RightStick,
    DPadUp,
    DPadDown,
    DPadLeft,
    DPadRight,
    Guide,
}

impl ButtonType {
    pub const ALL: [ButtonType; 15] = [
        ButtonType::A,
        ButtonType::B,
        ButtonType::X,
        ButtonType::Y,
        ButtonType::Start,
        ButtonType::Select,
        ButtonType::LeftBumper,
        ButtonType::RightBumper,
        ButtonType::LeftStick,
        ButtonType::RightStick,
        ButtonType::DPadUp,
        ButtonType::DPadDown,
        ButtonType::DPadLeft,
        ButtonType::DPadRight,
        ButtonType::Guide,
    ];

    /// Bit occupied by this button inside a [`ButtonMask`].
    pub const fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// Set of buttons held down at the time of an event.
///
/// The raw value is whatever the driver reports; bits that do not correspond
/// to a [`ButtonType`] are preserved and passed through to the callback.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ButtonMask(u32);

impl ButtonMask {
    pub const EMPTY: ButtonMask = ButtonMask(0);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, button: ButtonType) -> bool {
        self.0 & button.bit() != 0
    }

    pub fn press(&mut self, button: ButtonType) {
        self.0 |= button.bit();
    }

    pub fn release(&mut self, button: ButtonType) {
        self.0 &= !button.bit();
    }

    /// Known buttons contained in the mask, in declaration order.
    pub fn pressed(self) -> impl Iterator<Item = ButtonType> {
        ButtonType::ALL
            .into_iter()
            .filter(move |button| self.contains(*button))
    }
}

impl fmt::Debug for ButtonMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ButtonMask")
            .field(&format_args!("{:#06x}", self.0))
            .finish()
    }
}

impl From<ButtonType> for ButtonMask {
    fn from(button: ButtonType) -> Self {
        Self(button.bit())
    }
}

impl FromIterator<ButtonType> for ButtonMask {
    fn from_iter<T: IntoIterator<Item = ButtonType>>(iter: T) -> Self {
        let mut mask = ButtonMask::EMPTY;
        for button in iter {
            mask.press(button);
        }
        mask
    }
}
