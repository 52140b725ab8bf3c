//! The audio capture subprocess.
//!
//! USB isochronous handling stays out of this process: a helper program
//! reads the device's audio endpoint and writes raw PCM (s16le, 44.1 kHz,
//! stereo) to its stdout, which we consume as an opaque byte stream. Any
//! program honoring that contract works — including a platform-audio-API
//! fallback driver.
//!
//! Capture starts lazily (first consumer, or when the TCP stream wants
//! audio), restarts on serial reconnect, and stops on shutdown with SIGTERM,
//! escalating to SIGKILL after a second.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::hub::AudioHub;
use crate::shutdown::shutdown_child;

/// Read size for the stdout pump; ~23 ms of stereo 44.1 kHz s16le.
const CHUNK: usize = 4096;

/// Supervisor for the capture helper.
pub struct AudioCapture {
    command: Vec<String>,
    hub: Arc<AudioHub>,
    child: Mutex<Option<tokio::process::Child>>,
    running: AtomicBool,
}

impl AudioCapture {
    #[must_use]
    pub fn new(command: Vec<String>, hub: Arc<AudioHub>) -> Arc<Self> {
        Arc::new(Self {
            command,
            hub,
            child: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the helper and start pumping its stdout into the hub. A no-op
    /// when capture is already running.
    pub async fn start(self: &Arc<Self>) -> std::io::Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let Some((program, args)) = self.command.split_first() else {
            self.running.store(false, Ordering::SeqCst);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty audio capture command",
            ));
        };

        let mut child = match Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                warn!(program, error = %e, "audio capture helper failed to spawn");
                self.hub
                    .publish_capture_error(&format!("capture helper failed to start: {e}"));
                return Err(e);
            }
        };

        let stdout = child.stdout.take().ok_or_else(|| {
            std::io::Error::other("capture helper has no stdout")
        })?;
        *self.child.lock().await = Some(child);
        info!(program, "audio capture started");

        let capture = Arc::clone(self);
        tokio::spawn(async move {
            let mut stdout = stdout;
            let mut buf = vec![0u8; CHUNK];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => {
                        debug!("audio capture stdout closed");
                        break;
                    }
                    Ok(n) => capture.hub.handle_chunk(&buf[..n]),
                    Err(e) => {
                        warn!(error = %e, "audio capture read failed");
                        break;
                    }
                }
            }
            // If the helper died on its own, tell the consumers; a stop()
            // in flight has already cleared `running`.
            if capture.running.swap(false, Ordering::SeqCst) {
                capture
                    .hub
                    .publish_capture_error("audio capture stopped unexpectedly");
            }
        });

        Ok(())
    }

    /// Terminate the helper (SIGTERM, then SIGKILL after 1 s). Idempotent.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(child) = self.child.lock().await.take() {
            match shutdown_child(child).await {
                Ok(status) => info!(%status, "audio capture stopped"),
                Err(e) => warn!(error = %e, "audio capture did not stop cleanly"),
            }
        }
    }

    /// Restart after a serial reconnect: the helper holds the old USB audio
    /// handle and must re-open the device.
    pub async fn restart(self: &Arc<Self>) -> std::io::Result<()> {
        self.stop().await;
        self.start().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> Arc<AudioHub> {
        Arc::new(AudioHub::new())
    }

    #[tokio::test]
    async fn missing_helper_reports_a_control_message() {
        let hub = hub();
        let (_id, mut rx) = hub.subscribe();
        let capture = AudioCapture::new(vec!["/nonexistent/m8-audio".into()], Arc::clone(&hub));

        assert!(capture.start().await.is_err());
        assert!(!capture.is_running());

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame[0], super::super::hub::FRAME_CONTROL);
    }

    #[tokio::test]
    async fn empty_command_is_an_input_error() {
        let capture = AudioCapture::new(Vec::new(), hub());
        let err = capture.start().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn captures_helper_stdout_into_the_hub() {
        let hub = hub();
        let (_id, mut rx) = hub.subscribe();
        // `printf` stands in for the capture helper: a short byte burst,
        // then EOF.
        let capture = AudioCapture::new(
            vec!["printf".into(), "abc".into()],
            Arc::clone(&hub),
        );
        capture.start().await.unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame, vec![0x00, b'a', b'b', b'c']);

        // EOF is reported as a capture failure.
        let control = rx.recv().await.unwrap();
        assert_eq!(control[0], 0x01);
        capture.stop().await;
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn stop_terminates_a_long_running_helper() {
        let hub = hub();
        let capture = AudioCapture::new(vec!["sleep".into(), "30".into()], Arc::clone(&hub));
        capture.start().await.unwrap();
        assert!(capture.is_running());

        let started = std::time::Instant::now();
        capture.stop().await;
        assert!(!capture.is_running());
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }
}
