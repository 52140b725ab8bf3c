//! The fan-out coordinator.
//!
//! Every serial chunk flows through [`Fanout::ingest_chunk`], which routes it
//! in contract order: raw bytes first (TCP batch, `/display` subscribers),
//! then SLIP decoding, and for each decoded command one indivisible
//! projection step — text grid, framebuffer, tracked state, delta filter —
//! before the admitted command is JSON-broadcast to `/control`-side command
//! subscribers. Consumers therefore never observe a broadcast whose
//! projection has not happened yet.
//!
//! The 10 fps screen timer snapshots the framebuffer under the same lock and
//! pushes BMP bytes to `/screen` subscribers.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::json;
use tracing::{debug, warn};

use m8link_core::{
    Button, CommandParser, DeltaCache, DeltaStats, DisplayCommand, Framebuffer, SlipDecoder,
    TextGrid, TrackedState,
};

use crate::subscribers::SubscriberSet;
use crate::tcp::TcpBroadcaster;

/// Screen (BMP) broadcast period: 10 frames per second.
pub const SCREEN_PERIOD: Duration = Duration::from_millis(100);

/// Everything mutated by the command-application path, behind one lock so
/// each command applies as a single step.
struct Projection {
    decoder: SlipDecoder,
    parser: CommandParser,
    grid: TextGrid,
    framebuffer: Framebuffer,
    delta: DeltaCache,
    tracked: TrackedState,
    last_update_ms: Option<u64>,
}

/// The central routing layer.
pub struct Fanout {
    state: Mutex<Projection>,
    /// Verbatim serial chunks (`/display`).
    pub display_subs: SubscriberSet,
    /// JSON-serialized admitted commands.
    pub command_subs: SubscriberSet,
    /// BMP frames at 10 fps (`/screen`).
    pub image_subs: SubscriberSet,
    tcp: Mutex<Option<Arc<TcpBroadcaster>>>,
}

impl Default for Fanout {
    fn default() -> Self {
        Self::new()
    }
}

impl Fanout {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Projection {
                decoder: SlipDecoder::new(),
                parser: CommandParser::new(),
                grid: TextGrid::new(),
                framebuffer: Framebuffer::new(),
                delta: DeltaCache::new(),
                tracked: TrackedState::new(),
                last_update_ms: None,
            }),
            display_subs: SubscriberSet::new("display"),
            command_subs: SubscriberSet::new("command"),
            image_subs: SubscriberSet::new("image"),
            tcp: Mutex::new(None),
        }
    }

    /// Mirror raw chunks into the TCP broadcaster's display batch.
    pub fn attach_tcp(&self, tcp: Arc<TcpBroadcaster>) {
        *self.tcp.lock().unwrap() = Some(tcp);
    }

    /// Route one chunk from the serial link.
    pub fn ingest_chunk(&self, chunk: &[u8]) {
        // Raw consumers first; the wire contract requires raw bytes to be
        // observable before commands derived from them.
        if let Some(tcp) = self.tcp.lock().unwrap().as_ref() {
            tcp.queue_display(chunk);
        }
        self.display_subs.broadcast(chunk);

        // Decode, project, filter — one indivisible step per command.
        let admitted = {
            let mut state = self.state.lock().unwrap();
            let frames = state.decoder.feed(chunk);
            let mut admitted = Vec::new();
            for frame in frames {
                let Some(cmd) = state.parser.parse(&frame) else {
                    continue;
                };
                state.grid.apply(&cmd);
                state.framebuffer.apply(&cmd);
                state.tracked.observe(&cmd);
                if matches!(cmd, DisplayCommand::System { .. }) {
                    // The device just (re)announced itself; the screen that
                    // follows is complete, so re-anchor the estimate.
                    let grid = state.grid.clone();
                    state.tracked.verify(&grid);
                }
                state.last_update_ms = Some(now_ms());
                if state.delta.should_send(&cmd) {
                    match serde_json::to_vec(&cmd) {
                        Ok(body) => admitted.push(body),
                        Err(e) => warn!(error = %e, "command serialization failed"),
                    }
                }
            }
            admitted
        };

        for body in admitted {
            self.command_subs.broadcast(&body);
        }
    }

    /// Fold a key the gateway sent into the tracked-state estimate.
    pub fn note_key(&self, key: Button) {
        self.state.lock().unwrap().tracked.observe_key(key);
    }

    /// Screen as JSON for `GET /api/screen`.
    #[must_use]
    pub fn screen_json(&self) -> serde_json::Value {
        let state = self.state.lock().unwrap();
        let cursor = state.grid.cursor();
        json!({
            "rows": state.grid.rows(),
            "cursor": { "row": cursor.row, "col": cursor.col },
            "lastUpdate": state.last_update_ms,
        })
    }

    /// Screen as plain text for `GET /api/screen/text`.
    #[must_use]
    pub fn screen_text(&self) -> String {
        self.state.lock().unwrap().grid.render()
    }

    /// Consistent BMP snapshot of the framebuffer.
    #[must_use]
    pub fn snapshot_bmp(&self) -> Vec<u8> {
        self.state.lock().unwrap().framebuffer.to_bmp()
    }

    /// Tracked input state for `GET /api/state`.
    #[must_use]
    pub fn tracked_snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self.state.lock().unwrap().tracked.snapshot())
            .unwrap_or_else(|_| json!({}))
    }

    /// Delta cache statistics for `GET /api/stats`.
    #[must_use]
    pub fn delta_stats(&self) -> DeltaStats {
        self.state.lock().unwrap().delta.stats()
    }

    /// Forget cached emissions and any partial frame; used around a device
    /// reset so the full re-sent screen is re-emitted downstream.
    pub fn reset_projection(&self) {
        let mut state = self.state.lock().unwrap();
        state.delta.reset();
        state.decoder.reset();
        debug!("projection caches reset");
    }

    /// Start the 10 fps screen broadcast; returns the timer task handle.
    pub fn spawn_screen_timer(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let fanout = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SCREEN_PERIOD);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if fanout.image_subs.is_empty() {
                    continue;
                }
                let bmp = fanout.snapshot_bmp();
                fanout.image_subs.broadcast(&bmp);
            }
        })
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use m8link_core::slip_encode;

    /// S1 frame: text 'A' at pixel (16,20), white on black, SLIP-terminated.
    const S1: [u8; 14] = [
        0xFD, 0x41, 0x10, 0x00, 0x14, 0x00, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0xC0, 0xC0,
    ];

    #[tokio::test]
    async fn text_frame_projects_into_grid_and_cursor() {
        let fanout = Fanout::new();
        fanout.ingest_chunk(&S1);

        let screen = fanout.screen_json();
        let row = screen["rows"][2].as_str().unwrap();
        assert_eq!(&row[2..3], "A");
        assert_eq!(screen["cursor"]["row"], 2);
        assert_eq!(screen["cursor"]["col"], 2);
        assert!(screen["lastUpdate"].is_u64());
    }

    #[tokio::test]
    async fn raw_bytes_and_derived_commands_both_fan_out() {
        let fanout = Fanout::new();
        let (_d, mut display_rx) = fanout.display_subs.subscribe();
        let (_c, mut command_rx) = fanout.command_subs.subscribe();

        fanout.ingest_chunk(&S1);

        // Raw chunk arrives verbatim.
        assert_eq!(display_rx.recv().await.unwrap(), S1.to_vec());

        // Derived command arrives as tagged JSON.
        let body = command_rx.recv().await.unwrap();
        let cmd: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(cmd["type"], "text");
        assert_eq!(cmd["ch"], 0x41);
    }

    #[tokio::test]
    async fn redundant_commands_are_suppressed_for_command_subs() {
        let fanout = Fanout::new();
        let (_c, mut command_rx) = fanout.command_subs.subscribe();

        fanout.ingest_chunk(&S1);
        fanout.ingest_chunk(&S1);

        // Exactly one JSON emission for the repeated command.
        assert!(command_rx.recv().await.is_some());
        assert!(command_rx.try_recv().is_err());

        // But raw display consumers see every chunk regardless.
        let (_d, mut display_rx) = fanout.display_subs.subscribe();
        fanout.ingest_chunk(&S1);
        assert_eq!(display_rx.recv().await.unwrap(), S1.to_vec());
    }

    #[tokio::test]
    async fn screen_clear_resets_the_delta_cache() {
        // S2: a full-screen black rectangle empties the cache and the grid.
        let fanout = Fanout::new();
        let (_c, mut command_rx) = fanout.command_subs.subscribe();

        fanout.ingest_chunk(&S1);
        let clear = [
            0xFE, 0x00, 0x00, 0x00, 0x00, 0x40, 0x01, 0xF0, 0x00, 0x00, 0x00, 0x00, 0xC0,
        ];
        fanout.ingest_chunk(&clear);
        fanout.ingest_chunk(&S1);

        // text, rect, text again — all three admitted.
        for expected in ["text", "rectangle", "text"] {
            let body = command_rx.recv().await.unwrap();
            let cmd: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(cmd["type"], expected);
        }

        // The grid was cleared by the rectangle, then repopulated.
        let text = fanout.screen_text();
        assert!(text.contains('A'));
    }

    #[tokio::test]
    async fn fragmented_chunks_decode_identically() {
        let fanout = Fanout::new();
        let (_c, mut command_rx) = fanout.command_subs.subscribe();

        // Same frame, delivered one byte at a time.
        for &byte in &S1 {
            fanout.ingest_chunk(&[byte]);
        }
        let body = command_rx.recv().await.unwrap();
        let cmd: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(cmd["type"], "text");
    }

    #[tokio::test]
    async fn system_command_reanchors_tracked_state() {
        let fanout = Fanout::new();
        let frame = slip_encode(&[0xFF, 2, 3, 0, 1, 0]);
        fanout.ingest_chunk(&frame);
        let snapshot = fanout.tracked_snapshot();
        assert_eq!(snapshot["confidence"], 1.0);
    }

    #[tokio::test]
    async fn reset_projection_readmits_suppressed_commands() {
        let fanout = Fanout::new();
        let (_c, mut command_rx) = fanout.command_subs.subscribe();

        fanout.ingest_chunk(&S1);
        fanout.reset_projection();
        fanout.ingest_chunk(&S1);

        assert!(command_rx.recv().await.is_some());
        assert!(command_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn stats_track_sent_and_skipped() {
        let fanout = Fanout::new();
        fanout.ingest_chunk(&S1);
        fanout.ingest_chunk(&S1);
        let stats = fanout.delta_stats();
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.skipped, 1);
    }
}
