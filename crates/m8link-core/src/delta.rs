//! Redundancy filter for outbound command broadcasts.
//!
//! The device re-sends large parts of the screen on every refresh; most of it
//! is unchanged. The cache remembers the last text command per cell and the
//! last rectangle per geometry, and answers "does anyone downstream need to
//! see this again?". Consumers that apply commands idempotently observe the
//! same screen with or without the filter.
//!
//! A rectangle big enough to be a screen clear wipes the cache first — after
//! a clear, everything must be re-emitted. The threshold (320·200) is
//! deliberately below the full 320×240 screen: the device paints some screens
//! with a slightly short background rectangle, and those must reset the cache
//! too.

use std::collections::HashMap;

use serde::Serialize;

use crate::command::{Color, DisplayCommand};

/// Admitted rectangle area at or above which the cache resets.
const CLEAR_AREA: u32 = 320 * 200;

#[derive(Debug, Clone, PartialEq, Eq)]
struct CachedText {
    ch: u8,
    fg: Color,
    bg: Color,
}

/// Emission statistics, kept separately from the cache so they can be
/// reset independently.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DeltaStats {
    /// Commands admitted downstream.
    pub sent: u64,
    /// Commands suppressed as redundant.
    pub skipped: u64,
}

impl DeltaStats {
    /// Total commands considered.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.sent + self.skipped
    }

    /// Fraction of commands admitted; 0.0 when nothing was considered.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.sent as f64 / total as f64
        }
    }
}

/// Per-cell / per-rectangle memoization of the outbound stream.
#[derive(Debug, Default)]
pub struct DeltaCache {
    text: HashMap<(u16, u16), CachedText>,
    rects: HashMap<(u16, u16, u16, u16), Color>,
    stats: DeltaStats,
}

impl DeltaCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether `cmd` must be re-emitted, updating the cache state.
    ///
    /// Waveform, joypad, and system commands always pass; they are
    /// time-varying by nature.
    pub fn should_send(&mut self, cmd: &DisplayCommand) -> bool {
        let send = match cmd {
            DisplayCommand::Text { ch, x, y, fg, bg } => {
                let entry = CachedText {
                    ch: *ch,
                    fg: *fg,
                    bg: *bg,
                };
                match self.text.get(&(*x, *y)) {
                    Some(cached) if *cached == entry => false,
                    _ => {
                        self.text.insert((*x, *y), entry);
                        true
                    }
                }
            }
            DisplayCommand::Rectangle { x, y, w, h, color } => {
                if u32::from(*w) * u32::from(*h) >= CLEAR_AREA {
                    // Screen clear: every cached record is now stale.
                    self.text.clear();
                    self.rects.clear();
                    true
                } else {
                    match self.rects.get(&(*x, *y, *w, *h)) {
                        Some(cached) if cached == color => false,
                        _ => {
                            self.rects.insert((*x, *y, *w, *h), *color);
                            true
                        }
                    }
                }
            }
            DisplayCommand::Waveform { .. }
            | DisplayCommand::Joypad { .. }
            | DisplayCommand::System { .. } => true,
        };

        if send {
            self.stats.sent += 1;
        } else {
            self.stats.skipped += 1;
        }
        send
    }

    /// Empty both maps. Statistics are untouched.
    pub fn reset(&mut self) {
        self.text.clear();
        self.rects.clear();
    }

    /// Current statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> DeltaStats {
        self.stats
    }

    /// Zero the statistics without touching the cache.
    pub fn reset_stats(&mut self) {
        self.stats = DeltaStats::default();
    }

    /// Cached entries across both maps (diagnostic).
    #[must_use]
    pub fn len(&self) -> usize {
        self.text.len() + self.rects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.rects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_at(x: u16, y: u16) -> DisplayCommand {
        DisplayCommand::Text {
            ch: b'A',
            x,
            y,
            fg: Color::WHITE,
            bg: Color::BLACK,
        }
    }

    fn rect(x: u16, y: u16, w: u16, h: u16, color: Color) -> DisplayCommand {
        DisplayCommand::Rectangle { x, y, w, h, color }
    }

    #[test]
    fn identical_text_is_suppressed_once_cached() {
        let mut cache = DeltaCache::new();
        assert!(cache.should_send(&text_at(8, 10)));
        assert!(!cache.should_send(&text_at(8, 10)));

        // Any field change re-admits.
        let changed = DisplayCommand::Text {
            ch: b'B',
            x: 8,
            y: 10,
            fg: Color::WHITE,
            bg: Color::BLACK,
        };
        assert!(cache.should_send(&changed));
    }

    #[test]
    fn identical_rect_is_suppressed_once_cached() {
        let mut cache = DeltaCache::new();
        let r = rect(10, 10, 20, 20, Color::new(1, 2, 3));
        assert!(cache.should_send(&r));
        assert!(!cache.should_send(&r));
        assert!(cache.should_send(&rect(10, 10, 20, 20, Color::new(9, 9, 9))));
    }

    #[test]
    fn screen_clear_resets_both_maps() {
        let mut cache = DeltaCache::new();
        cache.should_send(&text_at(8, 10));
        cache.should_send(&rect(0, 0, 10, 10, Color::BLACK));

        // 320×200 exactly meets the threshold — below the full screen.
        assert!(cache.should_send(&rect(0, 0, 320, 200, Color::BLACK)));
        assert!(cache.is_empty());

        // Everything re-admits after the clear.
        assert!(cache.should_send(&text_at(8, 10)));
        assert!(cache.should_send(&rect(0, 0, 10, 10, Color::BLACK)));
    }

    #[test]
    fn just_under_threshold_does_not_reset() {
        let mut cache = DeltaCache::new();
        cache.should_send(&text_at(8, 10));
        assert!(cache.should_send(&rect(0, 0, 320, 199, Color::BLACK)));
        assert!(!cache.should_send(&text_at(8, 10)));
    }

    #[test]
    fn dynamic_commands_always_pass() {
        let mut cache = DeltaCache::new();
        let wave = DisplayCommand::Waveform {
            color: Color::WHITE,
            samples: vec![1, 2],
        };
        let pad = DisplayCommand::Joypad { state: 0 };
        for _ in 0..3 {
            assert!(cache.should_send(&wave));
            assert!(cache.should_send(&pad));
        }
    }

    #[test]
    fn stats_account_for_every_decision() {
        let mut cache = DeltaCache::new();
        cache.should_send(&text_at(0, 0));
        cache.should_send(&text_at(0, 0));
        cache.should_send(&text_at(0, 0));
        cache.should_send(&text_at(8, 0));

        let stats = cache.stats();
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.total(), 4);
        assert!((stats.ratio() - 0.5).abs() < f64::EPSILON);

        // Stats reset leaves the cache populated.
        cache.reset_stats();
        assert_eq!(cache.stats().total(), 0);
        assert!(!cache.should_send(&text_at(0, 0)));
    }

    #[test]
    fn explicit_reset_readmits_everything() {
        let mut cache = DeltaCache::new();
        cache.should_send(&text_at(0, 0));
        cache.reset();
        assert!(cache.should_send(&text_at(0, 0)));
    }
}
