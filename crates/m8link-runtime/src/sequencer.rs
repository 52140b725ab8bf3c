//! Timed execution of key presses, combos, and raw controller writes.
//!
//! The press choreography itself (which masks, which delays) is data in
//! `m8link_core::input`; this module plays it against the serial link and
//! keeps the tracked-state estimate informed about the keys it sends.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use m8link_core::input::{
    Button, combo_steps, controller_bytes, key_press_steps, note_off_bytes, note_on_bytes,
};

use crate::error::LinkError;
use crate::fanout::Fanout;
use crate::serial::SerialLink;

/// The slice of the serial link the sequencer needs. Static dispatch keeps
/// the call path allocation-free; tests substitute a recording stub.
pub trait LinkPort: Send + Sync + 'static {
    fn send_bytes(&self, bytes: &[u8]) -> impl Future<Output = Result<(), LinkError>> + Send;
}

impl LinkPort for SerialLink {
    async fn send_bytes(&self, bytes: &[u8]) -> Result<(), LinkError> {
        self.send(bytes).await
    }
}

/// Plays timed input sequences against the link.
pub struct InputSequencer<L: LinkPort = SerialLink> {
    link: Arc<L>,
    fanout: Option<Arc<Fanout>>,
}

impl<L: LinkPort> InputSequencer<L> {
    #[must_use]
    pub fn new(link: Arc<L>, fanout: Option<Arc<Fanout>>) -> Arc<Self> {
        Arc::new(Self { link, fanout })
    }

    /// Press and release a single key (`0x43 mask`, 50 ms, `0x43 0`).
    pub async fn press(&self, key: Button) -> Result<(), LinkError> {
        debug!(key = key.name(), "key press");
        for step in key_press_steps(key) {
            self.link.send_bytes(&controller_bytes(step.mask)).await?;
            sleep_step(step.delay).await;
        }
        if let Some(fanout) = &self.fanout {
            fanout.note_key(key);
        }
        Ok(())
    }

    /// Hold one key while pressing another (four timed steps).
    pub async fn combo(&self, hold: Button, press: Button) -> Result<(), LinkError> {
        debug!(hold = hold.name(), press = press.name(), "key combo");
        for step in combo_steps(hold, press) {
            self.link.send_bytes(&controller_bytes(step.mask)).await?;
            sleep_step(step.delay).await;
        }
        if let Some(fanout) = &self.fanout {
            fanout.note_key(press);
        }
        Ok(())
    }

    /// Write a raw controller bitmask. With `hold` set and `release` true, a
    /// zero mask is scheduled after the hold elapses; `release == false`
    /// leaves the mask held for the caller to clear.
    pub async fn raw(
        self: &Arc<Self>,
        mask: u8,
        hold: Option<Duration>,
        release: bool,
    ) -> Result<(), LinkError> {
        debug!(mask, ?hold, release, "raw controller write");
        self.link.send_bytes(&controller_bytes(mask)).await?;

        if let (Some(hold), true) = (hold, release) {
            let sequencer = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(hold).await;
                if let Err(e) = sequencer.link.send_bytes(&controller_bytes(0)).await {
                    debug!(error = %e, "scheduled release not delivered");
                }
            });
        }
        Ok(())
    }

    /// Note on (`0x4B note vel`).
    pub async fn note_on(&self, note: u8, velocity: u8) -> Result<(), LinkError> {
        self.link.send_bytes(&note_on_bytes(note, velocity)).await
    }

    /// Note off (`0x4B 0xFF`).
    pub async fn note_off(&self) -> Result<(), LinkError> {
        self.link.send_bytes(&note_off_bytes()).await
    }
}

async fn sleep_step(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    /// Records every write and its arrival time.
    struct RecordingLink {
        writes: Mutex<Vec<(Vec<u8>, Instant)>>,
        fail: bool,
    }

    impl RecordingLink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                writes: Mutex::new(Vec::new()),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                writes: Mutex::new(Vec::new()),
                fail: true,
            })
        }

        fn writes(&self) -> Vec<Vec<u8>> {
            self.writes
                .lock()
                .unwrap()
                .iter()
                .map(|(bytes, _)| bytes.clone())
                .collect()
        }
    }

    impl LinkPort for RecordingLink {
        async fn send_bytes(&self, bytes: &[u8]) -> Result<(), LinkError> {
            if self.fail {
                return Err(LinkError::NotConnected);
            }
            self.writes
                .lock()
                .unwrap()
                .push((bytes.to_vec(), Instant::now()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn press_writes_mask_then_zero_with_hold() {
        // S4 core: press "up" → 0x43 0x40, ~50 ms, 0x43 0x00.
        let link = RecordingLink::new();
        let sequencer = InputSequencer::new(Arc::clone(&link), None);

        let started = Instant::now();
        sequencer.press(Button::Up).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(link.writes(), vec![vec![0x43, 0x40], vec![0x43, 0x00]]);
        assert!(elapsed >= Duration::from_millis(45), "hold was {elapsed:?}");
    }

    #[tokio::test]
    async fn combo_is_four_writes_in_order() {
        let link = RecordingLink::new();
        let sequencer = InputSequencer::new(Arc::clone(&link), None);

        sequencer.combo(Button::Shift, Button::Down).await.unwrap();
        assert_eq!(
            link.writes(),
            vec![
                vec![0x43, 16],
                vec![0x43, 16 | 32],
                vec![0x43, 16],
                vec![0x43, 0],
            ]
        );
    }

    #[tokio::test]
    async fn raw_schedules_release_after_hold() {
        let link = RecordingLink::new();
        let sequencer = InputSequencer::new(Arc::clone(&link), None);

        sequencer
            .raw(0x05, Some(Duration::from_millis(20)), true)
            .await
            .unwrap();
        assert_eq!(link.writes(), vec![vec![0x43, 0x05]]);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(link.writes(), vec![vec![0x43, 0x05], vec![0x43, 0x00]]);
    }

    #[tokio::test]
    async fn raw_without_release_never_clears() {
        let link = RecordingLink::new();
        let sequencer = InputSequencer::new(Arc::clone(&link), None);

        sequencer
            .raw(0x05, Some(Duration::from_millis(10)), false)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(link.writes(), vec![vec![0x43, 0x05]]);
    }

    #[tokio::test]
    async fn notes_use_the_keyjazz_command() {
        let link = RecordingLink::new();
        let sequencer = InputSequencer::new(Arc::clone(&link), None);

        sequencer.note_on(60, 100).await.unwrap();
        sequencer.note_off().await.unwrap();
        assert_eq!(link.writes(), vec![vec![0x4B, 60, 100], vec![0x4B, 0xFF]]);
    }

    #[tokio::test]
    async fn disconnected_link_errors_propagate() {
        let link = RecordingLink::failing();
        let sequencer = InputSequencer::new(link, None);
        assert!(matches!(
            sequencer.press(Button::Up).await,
            Err(LinkError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn press_informs_tracked_state() {
        let link = RecordingLink::new();
        let fanout = Arc::new(Fanout::new());
        let sequencer = InputSequencer::new(Arc::clone(&link), Some(Arc::clone(&fanout)));

        sequencer.press(Button::Down).await.unwrap();
        let snapshot = fanout.tracked_snapshot();
        assert_eq!(snapshot["cursorRow"], 1);
    }
}
