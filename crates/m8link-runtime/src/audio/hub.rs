//! Multiplexer between the capture subprocess and audio consumers.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tracing::{info, warn};

use m8link_core::RingBuffer;

use crate::subscribers::SubscriberSet;
use crate::tcp::TcpBroadcaster;

/// Frame prefix for PCM payloads on the `/audio` WebSocket channel.
pub const FRAME_PCM: u8 = 0x00;
/// Frame prefix for JSON control messages on the `/audio` channel.
pub const FRAME_CONTROL: u8 = 0x01;

/// Ring capacity: about three quarters of a second of 44.1 kHz stereo s16le,
/// enough for a late joiner to be caught up without unbounded memory.
const RING_CAPACITY: usize = 128 * 1024;

/// Distributes PCM chunks to every audio consumer.
pub struct AudioHub {
    ring: Mutex<RingBuffer>,
    subs: SubscriberSet,
    recording: Mutex<Option<Recording>>,
    tcp: Mutex<Option<Arc<TcpBroadcaster>>>,
}

struct Recording {
    path: PathBuf,
    file: File,
}

impl Default for AudioHub {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioHub {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ring: Mutex::new(RingBuffer::overwriting(RING_CAPACITY)),
            subs: SubscriberSet::new("audio"),
            recording: Mutex::new(None),
            tcp: Mutex::new(None),
        }
    }

    /// Mirror every chunk to the TCP broadcaster as audio packets.
    pub fn attach_tcp(&self, tcp: Arc<TcpBroadcaster>) {
        *self.tcp.lock().unwrap() = Some(tcp);
    }

    /// Register a WebSocket consumer; frames arrive prefixed with
    /// [`FRAME_PCM`] or [`FRAME_CONTROL`].
    pub fn subscribe(&self) -> (u64, tokio::sync::mpsc::Receiver<Vec<u8>>) {
        self.subs.subscribe()
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subs.unsubscribe(id);
    }

    /// Live consumer count.
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.subs.len()
    }

    /// Ingest one PCM chunk from the capture subprocess.
    pub fn handle_chunk(&self, chunk: &[u8]) {
        // The overwriting ring never rejects a push.
        let _ = self.ring.lock().unwrap().push(chunk);

        let mut framed = Vec::with_capacity(chunk.len() + 1);
        framed.push(FRAME_PCM);
        framed.extend_from_slice(chunk);
        self.subs.broadcast(&framed);

        if let Some(tcp) = self.tcp.lock().unwrap().as_ref() {
            tcp.send_audio(chunk);
        }

        let mut recording = self.recording.lock().unwrap();
        if let Some(rec) = recording.as_mut() {
            if let Err(e) = rec.file.write_all(chunk) {
                warn!(path = %rec.path.display(), error = %e, "recording write failed, stopping");
                *recording = None;
            }
        }
    }

    /// Publish a control message (status, error, metadata) to consumers.
    pub fn publish_control(&self, message: &serde_json::Value) {
        let body = message.to_string();
        let mut framed = Vec::with_capacity(body.len() + 1);
        framed.push(FRAME_CONTROL);
        framed.extend_from_slice(body.as_bytes());
        self.subs.broadcast(&framed);
    }

    /// Report a capture failure to consumers.
    pub fn publish_capture_error(&self, detail: &str) {
        self.publish_control(&json!({
            "type": "captureError",
            "detail": detail,
        }));
    }

    /// Start recording raw PCM to `path`. An active recording is closed
    /// first; at most one is ever open.
    pub fn start_recording(&self, path: &Path) -> std::io::Result<()> {
        let file = File::create(path)?;
        let mut recording = self.recording.lock().unwrap();
        if let Some(previous) = recording.take() {
            info!(path = %previous.path.display(), "previous recording closed");
        }
        *recording = Some(Recording {
            path: path.to_path_buf(),
            file,
        });
        info!(path = %path.display(), "recording started");
        self.publish_control(&json!({
            "type": "recordingStarted",
            "path": path.display().to_string(),
        }));
        Ok(())
    }

    /// Stop and close the active recording, returning its path.
    pub fn stop_recording(&self) -> Option<PathBuf> {
        let stopped = self.recording.lock().unwrap().take().map(|rec| rec.path);
        if let Some(path) = &stopped {
            info!(path = %path.display(), "recording stopped");
            self.publish_control(&json!({
                "type": "recordingStopped",
                "path": path.display().to_string(),
            }));
        }
        stopped
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.recording.lock().unwrap().is_some()
    }

    /// Bytes currently buffered for late-join catch-up.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.ring.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pcm_frames_carry_the_pcm_prefix() {
        let hub = AudioHub::new();
        let (_id, mut rx) = hub.subscribe();

        hub.handle_chunk(&[10, 20, 30]);
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame[0], FRAME_PCM);
        assert_eq!(&frame[1..], &[10, 20, 30]);
    }

    #[tokio::test]
    async fn control_frames_carry_the_control_prefix() {
        let hub = AudioHub::new();
        let (_id, mut rx) = hub.subscribe();

        hub.publish_capture_error("helper exited");
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame[0], FRAME_CONTROL);
        let parsed: serde_json::Value = serde_json::from_slice(&frame[1..]).unwrap();
        assert_eq!(parsed["type"], "captureError");
        assert_eq!(parsed["detail"], "helper exited");
    }

    #[tokio::test]
    async fn dead_consumer_is_reaped_without_affecting_others() {
        let hub = AudioHub::new();
        let (_a, rx_a) = hub.subscribe();
        let (_b, mut rx_b) = hub.subscribe();
        drop(rx_a);

        hub.handle_chunk(&[1]);
        hub.handle_chunk(&[2]);
        assert_eq!(hub.consumer_count(), 1);
        assert_eq!(rx_b.recv().await.unwrap(), vec![FRAME_PCM, 1]);
        assert_eq!(rx_b.recv().await.unwrap(), vec![FRAME_PCM, 2]);
    }

    #[test]
    fn chunks_accumulate_in_the_ring() {
        let hub = AudioHub::new();
        hub.handle_chunk(&[0u8; 4096]);
        assert_eq!(hub.buffered(), 4096);
    }

    #[test]
    fn recording_is_at_most_one_and_appends_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("one.pcm");
        let second = dir.path().join("two.pcm");

        let hub = AudioHub::new();
        hub.start_recording(&first).unwrap();
        hub.handle_chunk(&[1, 2, 3]);

        // Starting another closes the first.
        hub.start_recording(&second).unwrap();
        hub.handle_chunk(&[4, 5]);
        assert!(hub.is_recording());
        let stopped = hub.stop_recording().unwrap();
        assert_eq!(stopped, second);
        assert!(!hub.is_recording());

        assert_eq!(std::fs::read(&first).unwrap(), vec![1, 2, 3]);
        assert_eq!(std::fs::read(&second).unwrap(), vec![4, 5]);

        // Stopping again is a no-op.
        assert!(hub.stop_recording().is_none());
    }
}
