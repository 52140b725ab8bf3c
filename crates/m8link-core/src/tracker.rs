//! Best-effort model of where the device UI currently is.
//!
//! The gateway cannot ask the device which screen is showing; it can only
//! watch the display stream and the keys it has itself sent. `TrackedState`
//! keeps that approximation for `/api/state`: the screen the header last
//! named, a cursor estimate, and a confidence scalar that decays as unparsed
//! display traffic goes by and snaps back when a header verification
//! succeeds.

use serde::Serialize;

use crate::command::DisplayCommand;
use crate::grid::TextGrid;
use crate::input::Button;

/// Confidence multiplier applied per applied display command.
const DECAY: f64 = 0.999;
/// Confidence floor; the estimate is reported as stale below this.
const STALE_BELOW: f64 = 0.3;

/// The tracker screens the device can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerScreen {
    Song,
    Chain,
    Phrase,
    Instrument,
    Table,
    Groove,
    Project,
    Mixer,
    Effects,
    Theme,
    Unknown,
}

impl TrackerScreen {
    /// Recognize a screen from the header row the device draws.
    #[must_use]
    pub fn from_header(header: &str) -> Self {
        let upper = header.to_ascii_uppercase();
        // Longest names first so "EFFECT SETTINGS" is not read as a prefix
        // of something shorter.
        const TABLE: [(&str, TrackerScreen); 10] = [
            ("EFFECT", TrackerScreen::Effects),
            ("INSTRUMENT", TrackerScreen::Instrument),
            ("PROJECT", TrackerScreen::Project),
            ("PHRASE", TrackerScreen::Phrase),
            ("GROOVE", TrackerScreen::Groove),
            ("CHAIN", TrackerScreen::Chain),
            ("MIXER", TrackerScreen::Mixer),
            ("TABLE", TrackerScreen::Table),
            ("THEME", TrackerScreen::Theme),
            ("SONG", TrackerScreen::Song),
        ];
        for (needle, screen) in TABLE {
            if upper.contains(needle) {
                return screen;
            }
        }
        TrackerScreen::Unknown
    }
}

/// Snapshot of the tracked input state, as served by `/api/state`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedSnapshot {
    pub screen: TrackerScreen,
    pub cursor_row: usize,
    pub cursor_col: usize,
    pub selection: u16,
    pub chain_row: usize,
    pub confidence: f64,
    pub stale: bool,
}

/// Derived device-UI state, updated from the command stream and sent keys.
#[derive(Debug)]
pub struct TrackedState {
    screen: TrackerScreen,
    cursor: (usize, usize),
    selection: u16,
    chain_row: usize,
    confidence: f64,
}

impl Default for TrackedState {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackedState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            screen: TrackerScreen::Unknown,
            cursor: (0, 0),
            selection: 0,
            chain_row: 0,
            confidence: 0.0,
        }
    }

    #[must_use]
    pub fn screen(&self) -> TrackerScreen {
        self.screen
    }

    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Fold one applied display command into the estimate.
    ///
    /// Every command decays confidence slightly; a joypad report overrides
    /// the selection word.
    pub fn observe(&mut self, cmd: &DisplayCommand) {
        self.confidence *= DECAY;
        if let DisplayCommand::Joypad { state } = cmd {
            self.selection = *state;
        }
    }

    /// Fold one key the gateway itself sent into the cursor estimate.
    pub fn observe_key(&mut self, key: Button) {
        match key {
            Button::Up => self.cursor.0 = self.cursor.0.saturating_sub(1),
            Button::Down => self.cursor.0 = (self.cursor.0 + 1).min(255),
            Button::Left => self.cursor.1 = self.cursor.1.saturating_sub(1),
            Button::Right => self.cursor.1 = (self.cursor.1 + 1).min(255),
            _ => {}
        }
        if self.screen == TrackerScreen::Chain {
            self.chain_row = self.cursor.0.min(15);
        }
    }

    /// Re-anchor the estimate against the reconstructed grid.
    ///
    /// Reads the header row to identify the screen and adopts the grid's
    /// highlighted cell as the cursor. Restores full confidence.
    pub fn verify(&mut self, grid: &TextGrid) {
        self.screen = TrackerScreen::from_header(&grid.header());
        let cursor = grid.cursor();
        self.cursor = (cursor.row, cursor.col);
        self.confidence = 1.0;
    }

    /// Current snapshot for reporting.
    #[must_use]
    pub fn snapshot(&self) -> TrackedSnapshot {
        TrackedSnapshot {
            screen: self.screen,
            cursor_row: self.cursor.0,
            cursor_col: self.cursor.1,
            selection: self.selection,
            chain_row: self.chain_row,
            confidence: self.confidence,
            stale: self.confidence < STALE_BELOW,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Color;

    #[test]
    fn header_recognition() {
        assert_eq!(TrackerScreen::from_header("SONG"), TrackerScreen::Song);
        assert_eq!(TrackerScreen::from_header("CHAIN 04"), TrackerScreen::Chain);
        assert_eq!(
            TrackerScreen::from_header("EFFECT SETTINGS"),
            TrackerScreen::Effects
        );
        assert_eq!(TrackerScreen::from_header(""), TrackerScreen::Unknown);
    }

    #[test]
    fn confidence_decays_and_verification_restores() {
        let mut state = TrackedState::new();
        let mut grid = TextGrid::new();
        for (i, ch) in b"SONG".iter().enumerate() {
            grid.apply(&DisplayCommand::Text {
                ch: *ch,
                x: (i as u16) * 8,
                y: 0,
                fg: Color::WHITE,
                bg: Color::BLACK,
            });
        }
        state.verify(&grid);
        assert_eq!(state.screen(), TrackerScreen::Song);
        assert!((state.confidence() - 1.0).abs() < f64::EPSILON);

        for _ in 0..5000 {
            state.observe(&DisplayCommand::Joypad { state: 0 });
        }
        assert!(state.confidence() < 1.0);
        assert!(state.snapshot().stale);

        state.verify(&grid);
        assert!(!state.snapshot().stale);
    }

    #[test]
    fn sent_keys_move_cursor_estimate() {
        let mut state = TrackedState::new();
        state.observe_key(Button::Down);
        state.observe_key(Button::Down);
        state.observe_key(Button::Right);
        let snap = state.snapshot();
        assert_eq!((snap.cursor_row, snap.cursor_col), (2, 1));

        state.observe_key(Button::Up);
        state.observe_key(Button::Left);
        state.observe_key(Button::Left);
        let snap = state.snapshot();
        assert_eq!((snap.cursor_row, snap.cursor_col), (1, 0));
    }

    #[test]
    fn joypad_updates_selection() {
        let mut state = TrackedState::new();
        state.observe(&DisplayCommand::Joypad { state: 0x104 });
        assert_eq!(state.snapshot().selection, 0x104);
    }
}
