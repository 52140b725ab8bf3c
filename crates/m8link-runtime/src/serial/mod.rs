//! The USB CDC serial link to the device.
//!
//! [`SerialLink`] owns the port handle for the life of the process. It can
//! be disconnected and reacquired any number of times; consumers never hold
//! the handle themselves. Received chunks flow out through a single bounded
//! channel that the fan-out coordinator drains — the coordinator hands each
//! chunk to the raw-byte consumers first and the SLIP decoder second, which
//! is what the wire contract requires.
//!
//! On link loss the reconnect loop scans at the configured period; after
//! three empty scans it walks the USB recovery ladder and then resumes
//! scanning.

mod detect;

pub use detect::{M8_PRODUCT_IDS, M8_VENDOR_ID, PortInfo, find_m8, list_ports};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info, warn};

use crate::config::GatewayConfig;
use crate::error::LinkError;
use crate::recovery::UsbRecovery;

/// Device command byte: controller/keyjazz live in `m8link_core::input`;
/// these are the link-level controls.
const CMD_ENABLE: u8 = 0x45; // 'E'
const CMD_RESET: u8 = 0x52; // 'R'
const CMD_DISCONNECT: u8 = 0x44; // 'D'

/// Pause between the enable and reset bytes of the display handshake.
const ENABLE_SETTLE: Duration = Duration::from_millis(500);

/// Failed scans before the reconnect loop escalates to USB recovery.
const SCANS_BEFORE_RECOVERY: u32 = 3;

/// Depth of the received-chunk channel toward the fan-out coordinator.
const CHUNK_QUEUE: usize = 256;

/// Read buffer size for the serial receiver.
const READ_BUF: usize = 1024;

/// Link lifecycle notifications.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A device was opened at the given path.
    Connected { path: String },
    /// The link was lost or closed.
    Disconnected,
}

/// Owner of the CDC device handle.
pub struct SerialLink {
    path_override: Option<String>,
    baud: u32,
    auto_reconnect: bool,
    reconnect_interval: Duration,

    writer: Mutex<Option<WriteHalf<SerialStream>>>,
    path: StdMutex<Option<String>>,
    chunk_tx: mpsc::Sender<Bytes>,
    events: broadcast::Sender<LinkEvent>,

    /// Bumped on every successful open so a stale reader can tell it has
    /// been superseded.
    generation: AtomicU64,
    reconnecting: AtomicBool,
    stopped: AtomicBool,

    /// Back-reference so `&self` paths (the receiver, a failed write) can
    /// start the reconnect loop.
    self_ref: StdMutex<Weak<SerialLink>>,

    recovery: UsbRecovery,
}

impl SerialLink {
    /// Build the link and hand back the chunk stream the fan-out
    /// coordinator consumes.
    #[must_use]
    pub fn new(config: &GatewayConfig) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_QUEUE);
        let (events, _) = broadcast::channel(16);
        let link = Arc::new(Self {
            path_override: config.serial_port.clone(),
            baud: config.baud,
            auto_reconnect: config.auto_reconnect,
            reconnect_interval: config.reconnect_interval,
            writer: Mutex::new(None),
            path: StdMutex::new(None),
            chunk_tx,
            events,
            generation: AtomicU64::new(0),
            reconnecting: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            self_ref: StdMutex::new(Weak::new()),
            recovery: UsbRecovery::new(),
        });
        *link.self_ref.lock().unwrap() = Arc::downgrade(&link);
        (link, chunk_rx)
    }

    /// Subscribe to connect/disconnect notifications.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.path.lock().unwrap().is_some()
    }

    /// Path of the currently open device, if any.
    #[must_use]
    pub fn port_path(&self) -> Option<String> {
        self.path.lock().unwrap().clone()
    }

    /// Locate and open the device, start the receiver, and run the display
    /// handshake. Returns the opened path.
    pub async fn connect(self: &Arc<Self>) -> Result<String, LinkError> {
        let path = match &self.path_override {
            Some(path) => path.clone(),
            None => detect::find_m8()?.ok_or(LinkError::DeviceNotFound)?,
        };
        self.connect_to(&path).await
    }

    /// Open a specific device path (explicit selection via `/api/port`).
    pub async fn connect_to(self: &Arc<Self>, path: &str) -> Result<String, LinkError> {
        let builder = tokio_serial::new(path, self.baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None);

        let stream = builder.open_native_async().map_err(|source| LinkError::Open {
            path: path.to_string(),
            source,
        })?;

        let (read_half, write_half) = tokio::io::split(stream);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.writer.lock().await = Some(write_half);
        *self.path.lock().unwrap() = Some(path.to_string());

        let link = Arc::clone(self);
        tokio::spawn(link.run_reader(read_half, generation));

        info!(port = %path, baud = self.baud, "serial link opened");
        let _ = self.events.send(LinkEvent::Connected {
            path: path.to_string(),
        });

        self.enable_display().await?;
        Ok(path.to_string())
    }

    async fn run_reader(self: Arc<Self>, mut read_half: ReadHalf<SerialStream>, generation: u64) {
        let mut buf = vec![0u8; READ_BUF];
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            match read_half.read(&mut buf).await {
                Ok(0) => {
                    warn!("serial stream reported EOF");
                    break;
                }
                Ok(n) => {
                    if self.chunk_tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                        // Fan-out is gone; the process is shutting down.
                        return;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "serial read failed");
                    break;
                }
            }
        }

        // Only the reader of the current generation may declare the link
        // lost; a superseded reader just exits.
        if self.generation.load(Ordering::SeqCst) == generation {
            self.mark_disconnected().await;
        }
    }

    /// Write and drain an outbound byte sequence.
    pub async fn send(&self, bytes: &[u8]) -> Result<(), LinkError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(LinkError::NotConnected)?;
        let result = async {
            writer.write_all(bytes).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = result {
            drop(guard);
            error!(error = %e, "serial write failed, marking link lost");
            self.mark_disconnected().await;
            return Err(LinkError::Io(e));
        }
        debug!(len = bytes.len(), "serial write");
        Ok(())
    }

    /// Run the display handshake: enable, settle, reset.
    pub async fn enable_display(&self) -> Result<(), LinkError> {
        self.send(&[CMD_ENABLE]).await?;
        tokio::time::sleep(ENABLE_SETTLE).await;
        self.send(&[CMD_RESET]).await
    }

    /// Ask the device to resend the full screen.
    pub async fn reset_display(&self) -> Result<(), LinkError> {
        self.send(&[CMD_RESET]).await
    }

    /// Graceful close: send the disconnect sentinel (best-effort) and drop
    /// the handle without triggering the reconnect loop.
    pub async fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if self.is_connected() {
            if let Err(e) = self.send(&[CMD_DISCONNECT]).await {
                debug!(error = %e, "disconnect sentinel not delivered");
            }
        }
        *self.writer.lock().await = None;
        *self.path.lock().unwrap() = None;
        let _ = self.events.send(LinkEvent::Disconnected);
    }

    /// Drop the current connection (if any) and immediately try to acquire
    /// a device again. Used by `POST /api/reconnect`.
    pub async fn force_reconnect(self: &Arc<Self>) -> Result<String, LinkError> {
        *self.writer.lock().await = None;
        *self.path.lock().unwrap() = None;
        let _ = self.events.send(LinkEvent::Disconnected);
        self.connect().await
    }

    async fn mark_disconnected(&self) {
        *self.writer.lock().await = None;
        let had_path = self.path.lock().unwrap().take().is_some();
        if had_path {
            info!("serial link disconnected");
            let _ = self.events.send(LinkEvent::Disconnected);
        }
        if self.auto_reconnect && !self.stopped.load(Ordering::SeqCst) {
            if let Some(link) = self.self_ref.lock().unwrap().upgrade() {
                link.spawn_reconnect_loop();
            }
        }
    }

    /// Start the periodic scan loop; a no-op if one is already running.
    pub fn spawn_reconnect_loop(self: &Arc<Self>) {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        let link = Arc::clone(self);
        tokio::spawn(async move {
            let mut failures: u32 = 0;
            let mut ticker = tokio::time::interval(link.reconnect_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(
                interval_ms = link.reconnect_interval.as_millis() as u64,
                "reconnect loop started"
            );
            loop {
                ticker.tick().await;
                if link.stopped.load(Ordering::SeqCst) || link.is_connected() {
                    break;
                }
                match link.connect().await {
                    Ok(path) => {
                        info!(port = %path, "device reacquired");
                        break;
                    }
                    Err(e) => {
                        failures += 1;
                        debug!(error = %e, failures, "scan failed");
                        if failures >= SCANS_BEFORE_RECOVERY {
                            warn!(failures, "escalating to USB recovery ladder");
                            let outcome = link.recovery.run_auto(6).await;
                            info!(
                                procedure = outcome.procedure,
                                success = outcome.success,
                                device_found = outcome.device_found,
                                "recovery ladder finished"
                            );
                            failures = 0;
                        }
                    }
                }
            }
            link.reconnecting.store(false, Ordering::SeqCst);
        });
    }

    /// Permanently stop the link's background activity.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}
