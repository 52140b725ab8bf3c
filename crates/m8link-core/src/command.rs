//! Display command parsing for the device's SLIP-framed wire dialect.
//!
//! Each decoded SLIP frame carries exactly one command; the first byte is the
//! command identifier. All multi-byte integers on the device side are
//! **little-endian** (the TCP re-broadcast framing in `m8link-runtime` uses
//! big-endian length prefixes — the two must never be mixed).
//!
//! Identifiers:
//!
//! | id | command | length |
//! |----|---------|--------|
//! | `0xFE` | rectangle | 5, 8, 9 or 12 bytes |
//! | `0xFD` | text | 12 bytes |
//! | `0xFC` | waveform | ≥ 4 bytes |
//! | `0xFB` | joypad | 2 or 3 bytes |
//! | `0xFF` | system info | 6 bytes |
//!
//! Unknown identifiers and under-length frames parse to `None`: the dialect
//! is non-adversarial and forward-compatible, so malformed input is dropped
//! rather than treated as an error.

use serde::{Deserialize, Serialize};

/// Rectangle command identifier.
pub const CMD_RECTANGLE: u8 = 0xFE;
/// Text (character) command identifier.
pub const CMD_TEXT: u8 = 0xFD;
/// Waveform command identifier.
pub const CMD_WAVEFORM: u8 = 0xFC;
/// Joypad state command identifier.
pub const CMD_JOYPAD: u8 = 0xFB;
/// System info command identifier.
pub const CMD_SYSTEM: u8 = 0xFF;

/// Longest legal waveform sample run (one column per sample, device is 480
/// columns wide in its widest mode; ours renders the rightmost band).
pub const MAX_WAVEFORM_SAMPLES: usize = 480;

/// An 8-bit-per-channel RGB color. Equality is componentwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };
    pub const WHITE: Color = Color {
        r: 255,
        g: 255,
        b: 255,
    };

    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// One parsed display command.
///
/// Serializes as an internally tagged JSON union for the command WebSocket
/// channel, e.g. `{"type":"text","ch":65,"x":16,"y":20,...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DisplayCommand {
    /// Filled rectangle. `w` and `h` are always ≥ 1; the 1×1 and colorless
    /// wire forms have been resolved by the parser.
    Rectangle {
        x: u16,
        y: u16,
        w: u16,
        h: u16,
        color: Color,
    },
    /// One character cell.
    Text {
        /// Raw character code; codes outside `0x20..=0x7E` render as space.
        ch: u8,
        x: u16,
        y: u16,
        fg: Color,
        bg: Color,
    },
    /// Oscilloscope strip along the top-right of the screen.
    Waveform { color: Color, samples: Vec<u8> },
    /// Raw controller bitmask as reported by the device.
    Joypad { state: u16 },
    /// Hardware/firmware identification, sent after enable.
    System {
        hardware: u8,
        fw_major: u8,
        fw_minor: u8,
        fw_patch: u8,
        /// Active font mode, `0..=4`.
        font_mode: u8,
    },
}

impl DisplayCommand {
    /// True when `ch` falls in the printable ASCII range the glyph atlases
    /// cover.
    #[must_use]
    pub fn printable(ch: u8) -> bool {
        (0x20..=0x7E).contains(&ch)
    }
}

fn u16_le(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn rgb(bytes: &[u8], at: usize) -> Color {
    Color::new(bytes[at], bytes[at + 1], bytes[at + 2])
}

/// Stateful frame-to-command parser.
///
/// The wire dialect allows a rectangle to omit its color, inheriting the last
/// color any rectangle carried — across frames. That one piece of state lives
/// here, so parsing is a function of the parser value plus the frame and
/// nothing else.
#[derive(Debug)]
pub struct CommandParser {
    last_rect_color: Color,
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandParser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_rect_color: Color::BLACK,
        }
    }

    /// The color the next colorless rectangle will inherit.
    #[must_use]
    pub fn last_rect_color(&self) -> Color {
        self.last_rect_color
    }

    /// Parse one frame. Returns `None` for empty frames, unknown identifiers,
    /// and frames whose length does not match the identifier's table.
    pub fn parse(&mut self, frame: &[u8]) -> Option<DisplayCommand> {
        let (&id, rest) = frame.split_first()?;
        match id {
            CMD_RECTANGLE => self.parse_rectangle(frame),
            CMD_TEXT => parse_text(frame),
            CMD_WAVEFORM => parse_waveform(rest),
            CMD_JOYPAD => parse_joypad(rest),
            CMD_SYSTEM => parse_system(rest),
            other => {
                tracing::trace!(id = other, len = frame.len(), "unknown command id");
                None
            }
        }
    }

    /// Rectangle, four wire forms: 5 bytes (1×1, inherited color), 8 bytes
    /// (1×1 + RGB), 9 bytes (sized, inherited color), 12 bytes (sized + RGB).
    fn parse_rectangle(&mut self, frame: &[u8]) -> Option<DisplayCommand> {
        let x = if frame.len() >= 5 { u16_le(frame, 1) } else { return None };
        let y = u16_le(frame, 3);

        let (w, h, color) = match frame.len() {
            5 => (1, 1, self.last_rect_color),
            8 => {
                self.last_rect_color = rgb(frame, 5);
                (1, 1, self.last_rect_color)
            }
            9 => (u16_le(frame, 5), u16_le(frame, 7), self.last_rect_color),
            12 => {
                self.last_rect_color = rgb(frame, 9);
                (u16_le(frame, 5), u16_le(frame, 7), self.last_rect_color)
            }
            _ => return None,
        };
        Some(DisplayCommand::Rectangle { x, y, w, h, color })
    }
}

/// Text, exactly 12 bytes: id, char code, x:u16le, y:u16le, fg RGB, bg RGB.
fn parse_text(frame: &[u8]) -> Option<DisplayCommand> {
    if frame.len() != 12 {
        return None;
    }
    Some(DisplayCommand::Text {
        ch: frame[1],
        x: u16_le(frame, 2),
        y: u16_le(frame, 4),
        fg: rgb(frame, 6),
        bg: rgb(frame, 9),
    })
}

/// Waveform: RGB color then one byte per sample (possibly zero samples).
/// A run longer than [`MAX_WAVEFORM_SAMPLES`] keeps its leading samples;
/// dropping the whole frame would also lose the strip redraw it carries.
fn parse_waveform(rest: &[u8]) -> Option<DisplayCommand> {
    if rest.len() < 3 {
        return None;
    }
    let samples = &rest[3..];
    let samples = &samples[..samples.len().min(MAX_WAVEFORM_SAMPLES)];
    Some(DisplayCommand::Waveform {
        color: Color::new(rest[0], rest[1], rest[2]),
        samples: samples.to_vec(),
    })
}

/// Joypad: the device has been observed emitting both a single state byte
/// and a two-byte little-endian state (trailing frames differ by firmware).
/// Both are accepted.
fn parse_joypad(rest: &[u8]) -> Option<DisplayCommand> {
    let state = match rest.len() {
        1 => u16::from(rest[0]),
        2 => u16::from_le_bytes([rest[0], rest[1]]),
        _ => return None,
    };
    Some(DisplayCommand::Joypad { state })
}

/// System info, exactly 5 payload bytes mapping one-to-one to the fields.
fn parse_system(rest: &[u8]) -> Option<DisplayCommand> {
    if rest.len() != 5 {
        return None;
    }
    Some(DisplayCommand::System {
        hardware: rest[0],
        fw_major: rest[1],
        fw_minor: rest[2],
        fw_patch: rest[3],
        font_mode: rest[4],
    })
}
