//! Device protocol and screen-state domain for the M8 gateway.
//!
//! Everything in this crate is pure computation: the SLIP codec, the display
//! command parser, the two screen projections (character grid and RGB
//! framebuffer), the delta cache that suppresses redundant re-emission, the
//! audio ring buffer, and the button/input encoding tables. No I/O, no async.
//!
//! The adapter crates (`m8link-runtime`, `m8link-axum`) wire these pieces to
//! the serial device, TCP/WebSocket consumers, and the REST surface.

pub mod command;
pub mod delta;
pub mod error;
pub mod font;
pub mod framebuffer;
pub mod grid;
pub mod input;
pub mod ring;
pub mod slip;
pub mod tracker;

// Re-export commonly used types for convenience
pub use command::{Color, CommandParser, DisplayCommand};
pub use delta::{DeltaCache, DeltaStats};
pub use error::RingBufferError;
pub use font::{FontMode, FontSpec};
pub use framebuffer::{Framebuffer, SCREEN_HEIGHT, SCREEN_WIDTH};
pub use grid::{Cursor, GRID_COLS, GRID_ROWS, TextCell, TextGrid};
pub use input::{Button, ComboStep, combo_steps, key_press_steps};
pub use ring::RingBuffer;
pub use slip::{SlipDecoder, slip_encode};
pub use tracker::{TrackedState, TrackerScreen};
