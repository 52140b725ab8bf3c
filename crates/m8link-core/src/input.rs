//! Controller buttons, bitmask encoding, and press sequencing tables.
//!
//! The device takes its controller state as a single byte behind the `0x43`
//! command: one bit per button. A "press" is therefore two writes (mask, then
//! zero) separated by a hold; a combo is a four-step hold/press/release
//! choreography. The timed steps are described here as data — the runtime's
//! input sequencer executes them against the serial link.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Controller-state command byte.
pub const CMD_CONTROLLER: u8 = 0x43;
/// Note-on/off command byte.
pub const CMD_KEYJAZZ: u8 = 0x4B;

/// Hold time for a single key press.
pub const KEY_HOLD: Duration = Duration::from_millis(50);
/// Settle time on either side of a combo's press phase.
pub const COMBO_SETTLE: Duration = Duration::from_millis(20);

/// One hardware button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Button {
    Edit,
    Opt,
    Right,
    Start,
    Shift,
    Down,
    Up,
    Left,
}

impl Button {
    /// All buttons in bit order.
    pub const ALL: [Button; 8] = [
        Button::Edit,
        Button::Opt,
        Button::Right,
        Button::Start,
        Button::Shift,
        Button::Down,
        Button::Up,
        Button::Left,
    ];

    /// Bit position in the controller byte.
    #[must_use]
    pub fn bit(self) -> u8 {
        match self {
            Button::Edit => 0,
            Button::Opt => 1,
            Button::Right => 2,
            Button::Start => 3,
            Button::Shift => 4,
            Button::Down => 5,
            Button::Up => 6,
            Button::Left => 7,
        }
    }

    /// Bitmask value (`1 << bit`).
    #[must_use]
    pub fn mask(self) -> u8 {
        1 << self.bit()
    }

    /// Canonical lowercase name, as used in REST paths and control-channel
    /// JSON.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Button::Edit => "edit",
            Button::Opt => "opt",
            Button::Right => "right",
            Button::Start => "start",
            Button::Shift => "shift",
            Button::Down => "down",
            Button::Up => "up",
            Button::Left => "left",
        }
    }

    /// Parse a key name, case-insensitively. A couple of common aliases from
    /// the original viewer are accepted.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "edit" => Some(Button::Edit),
            "opt" | "option" => Some(Button::Opt),
            "right" => Some(Button::Right),
            "start" | "play" => Some(Button::Start),
            "shift" | "select" => Some(Button::Shift),
            "down" => Some(Button::Down),
            "up" => Some(Button::Up),
            "left" => Some(Button::Left),
            _ => None,
        }
    }
}

/// One timed step of a press sequence: write the controller mask, then wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComboStep {
    /// Controller byte to write.
    pub mask: u8,
    /// Pause after the write; zero for the final step.
    pub delay: Duration,
}

/// The two-step sequence for a single key press.
#[must_use]
pub fn key_press_steps(key: Button) -> [ComboStep; 2] {
    [
        ComboStep {
            mask: key.mask(),
            delay: KEY_HOLD,
        },
        ComboStep {
            mask: 0,
            delay: Duration::ZERO,
        },
    ]
}

/// The four-step sequence for a hold+press combo: hold alone, hold with the
/// pressed key, back to hold alone, then everything up.
#[must_use]
pub fn combo_steps(hold: Button, press: Button) -> [ComboStep; 4] {
    [
        ComboStep {
            mask: hold.mask(),
            delay: COMBO_SETTLE,
        },
        ComboStep {
            mask: hold.mask() | press.mask(),
            delay: KEY_HOLD,
        },
        ComboStep {
            mask: hold.mask(),
            delay: COMBO_SETTLE,
        },
        ComboStep {
            mask: 0,
            delay: Duration::ZERO,
        },
    ]
}

/// Encode a controller-state write.
#[must_use]
pub fn controller_bytes(mask: u8) -> [u8; 2] {
    [CMD_CONTROLLER, mask]
}

/// Encode a note-on write.
#[must_use]
pub fn note_on_bytes(note: u8, velocity: u8) -> [u8; 3] {
    [CMD_KEYJAZZ, note, velocity]
}

/// Encode a note-off write.
#[must_use]
pub fn note_off_bytes() -> [u8; 2] {
    [CMD_KEYJAZZ, 0xFF]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmask_table() {
        let expected = [
            (Button::Edit, 1),
            (Button::Opt, 2),
            (Button::Right, 4),
            (Button::Start, 8),
            (Button::Shift, 16),
            (Button::Down, 32),
            (Button::Up, 64),
            (Button::Left, 128),
        ];
        for (button, mask) in expected {
            assert_eq!(button.mask(), mask, "{button:?}");
        }
    }

    #[test]
    fn name_round_trip() {
        for button in Button::ALL {
            assert_eq!(Button::from_name(button.name()), Some(button));
        }
        assert_eq!(Button::from_name("UP"), Some(Button::Up));
        assert_eq!(Button::from_name("Select"), Some(Button::Shift));
        assert_eq!(Button::from_name("banana"), None);
    }

    #[test]
    fn key_press_is_mask_then_release() {
        let steps = key_press_steps(Button::Up);
        assert_eq!(steps[0].mask, 0x40);
        assert_eq!(steps[0].delay, Duration::from_millis(50));
        assert_eq!(steps[1].mask, 0);
    }

    #[test]
    fn combo_is_four_timed_steps() {
        let steps = combo_steps(Button::Shift, Button::Down);
        assert_eq!(
            steps.map(|s| s.mask),
            [16, 16 | 32, 16, 0],
        );
        assert_eq!(steps[0].delay, COMBO_SETTLE);
        assert_eq!(steps[1].delay, KEY_HOLD);
        assert_eq!(steps[2].delay, COMBO_SETTLE);
        assert_eq!(steps[3].delay, Duration::ZERO);
    }

    #[test]
    fn wire_encodings() {
        assert_eq!(controller_bytes(0x40), [0x43, 0x40]);
        assert_eq!(note_on_bytes(60, 100), [0x4B, 60, 100]);
        assert_eq!(note_off_bytes(), [0x4B, 0xFF]);
    }
}
