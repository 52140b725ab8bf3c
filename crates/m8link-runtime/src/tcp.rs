//! Raw-TCP broadcaster for native viewer clients.
//!
//! Server → client packets are tagged and length-prefixed (`tag`, `len:u16`
//! **big-endian**, payload). Display chunks are batched and flushed on a
//! short timer as one write; audio chunks go out immediately. Client →
//! server bytes are raw device commands and are merged, unframed and
//! unmodified, onto the serial link.
//!
//! Every client gets its own bounded queue and writer task; a slow or dead
//! client is dropped without touching its siblings.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::serial::SerialLink;

/// Packet tag for display (SLIP stream) payloads.
pub const TAG_DISPLAY: u8 = 0x44;
/// Packet tag for raw PCM payloads.
pub const TAG_AUDIO: u8 = 0x41;

/// Batch flush period. Must stay under 16 ms to keep the display fluid.
const BATCH_INTERVAL: Duration = Duration::from_millis(5);

/// Per-client outbound queue depth.
const CLIENT_QUEUE: usize = 128;

/// Frame a payload as one or more `tag || len:u16be || bytes` packets.
///
/// Payloads longer than a u16 length are split; order is preserved.
#[must_use]
pub fn frame_packets(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 3);
    for part in payload.chunks(usize::from(u16::MAX)) {
        out.push(tag);
        out.extend_from_slice(&(part.len() as u16).to_be_bytes());
        out.extend_from_slice(part);
    }
    out
}

/// The TCP fan-out endpoint.
pub struct TcpBroadcaster {
    clients: Mutex<HashMap<u64, mpsc::Sender<Vec<u8>>>>,
    next_id: AtomicU64,
    batch: Mutex<Vec<u8>>,
    stopped: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TcpBroadcaster {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            batch: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Bind the listener and start the accept loop and the batch flush
    /// timer. Client input bytes are forwarded to `link`.
    pub async fn start(
        self: &Arc<Self>,
        port: u16,
        link: Arc<SerialLink>,
    ) -> std::io::Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        info!(port, "TCP broadcaster listening");

        let acceptor = {
            let broadcaster = Arc::clone(self);
            tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((socket, peer)) => {
                            debug!(%peer, "TCP client connected");
                            broadcaster.attach_client(socket, Arc::clone(&link));
                        }
                        Err(e) => {
                            warn!(error = %e, "TCP accept failed");
                            break;
                        }
                    }
                }
            })
        };

        let flusher = {
            let broadcaster = Arc::clone(self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(BATCH_INTERVAL);
                loop {
                    ticker.tick().await;
                    if broadcaster.stopped.load(Ordering::SeqCst) {
                        break;
                    }
                    broadcaster.flush_batch();
                }
            })
        };

        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(acceptor);
        tasks.push(flusher);
        Ok(())
    }

    fn attach_client(self: &Arc<Self>, socket: TcpStream, link: Arc<SerialLink>) {
        if let Err(e) = socket.set_nodelay(true) {
            warn!(error = %e, "failed to set TCP_NODELAY");
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(CLIENT_QUEUE);
        self.clients.lock().unwrap().insert(id, tx);

        let (mut reader, mut writer) = socket.into_split();

        // Writer: drain the client's queue; any write error ends the client.
        {
            let broadcaster = Arc::clone(self);
            tokio::spawn(async move {
                while let Some(packet) = rx.recv().await {
                    if let Err(e) = writer.write_all(&packet).await {
                        debug!(id, error = %e, "TCP client write failed");
                        break;
                    }
                }
                broadcaster.remove_client(id);
            });
        }

        // Reader: raw device commands, forwarded verbatim to the link.
        // Input from all clients merges at the byte level.
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Err(e) = link.send(&buf[..n]).await {
                            debug!(id, error = %e, "client input not delivered to device");
                        }
                    }
                }
            }
            debug!(id, "TCP client input stream closed");
        });
    }

    fn remove_client(&self, id: u64) {
        if self.clients.lock().unwrap().remove(&id).is_some() {
            debug!(id, "TCP client removed");
        }
    }

    /// Connected client count.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    /// Queue a display chunk into the current batch.
    pub fn queue_display(&self, chunk: &[u8]) {
        if self.clients.lock().unwrap().is_empty() {
            return;
        }
        self.batch
            .lock()
            .unwrap()
            .extend_from_slice(&frame_packets(TAG_DISPLAY, chunk));
    }

    /// Send an audio chunk immediately, bypassing the batch.
    pub fn send_audio(&self, chunk: &[u8]) {
        self.send_to_all(frame_packets(TAG_AUDIO, chunk));
    }

    /// Flush the pending display batch as a single write per client.
    pub fn flush_batch(&self) {
        let pending = std::mem::take(&mut *self.batch.lock().unwrap());
        if !pending.is_empty() {
            self.send_to_all(pending);
        }
    }

    fn send_to_all(&self, packet: Vec<u8>) {
        let snapshot: Vec<(u64, mpsc::Sender<Vec<u8>>)> = self
            .clients
            .lock()
            .unwrap()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut dead = Vec::new();
        for (id, tx) in snapshot {
            if tx.try_send(packet.clone()).is_err() {
                warn!(id, "TCP client queue unavailable, dropping client");
                dead.push(id);
            }
        }
        for id in dead {
            self.remove_client(id);
        }
    }

    /// Stop accepting, flush the pending batch best-effort, and drop every
    /// client. Idempotent.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.flush_batch();
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        // Dropping the senders ends each client's writer task.
        self.clients.lock().unwrap().clear();
        info!("TCP broadcaster stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;

    /// Parse a byte string as `tag || len:u16be || payload` records.
    fn parse_packets(mut bytes: &[u8]) -> Vec<(u8, Vec<u8>)> {
        let mut packets = Vec::new();
        while !bytes.is_empty() {
            assert!(bytes.len() >= 3, "truncated packet header");
            let tag = bytes[0];
            assert!(tag == TAG_DISPLAY || tag == TAG_AUDIO, "unknown tag {tag:#x}");
            let len = usize::from(u16::from_be_bytes([bytes[1], bytes[2]]));
            assert!(bytes.len() >= 3 + len, "truncated payload");
            packets.push((tag, bytes[3..3 + len].to_vec()));
            bytes = &bytes[3 + len..];
        }
        packets
    }

    #[test]
    fn framing_is_tag_len_payload() {
        let framed = frame_packets(TAG_DISPLAY, &[1, 2, 3]);
        assert_eq!(framed, vec![0x44, 0x00, 0x03, 1, 2, 3]);
        let parsed = parse_packets(&framed);
        assert_eq!(parsed, vec![(0x44, vec![1, 2, 3])]);
    }

    #[test]
    fn oversized_payload_splits_into_valid_packets() {
        let payload = vec![0xAB; 70_000];
        let framed = frame_packets(TAG_AUDIO, &payload);
        let parsed = parse_packets(&framed);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].1.len(), 65_535);
        assert_eq!(parsed[1].1.len(), 70_000 - 65_535);
        let rejoined: Vec<u8> = parsed.into_iter().flat_map(|(_, p)| p).collect();
        assert_eq!(rejoined, payload);
    }

    /// Register a raw channel as a fake client so framing and isolation can
    /// be tested without sockets.
    fn register_fake(broadcaster: &TcpBroadcaster) -> (u64, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel::<Vec<u8>>(CLIENT_QUEUE);
        let id = broadcaster.next_id.fetch_add(1, Ordering::Relaxed);
        broadcaster.clients.lock().unwrap().insert(id, tx);
        (id, rx)
    }

    #[tokio::test]
    async fn batch_accumulates_and_flushes_once() {
        let broadcaster = TcpBroadcaster::new();
        let (_id, mut client) = register_fake(&broadcaster);

        broadcaster.queue_display(&[1, 2]);
        broadcaster.queue_display(&[3]);
        broadcaster.flush_batch();

        // Both chunks arrive as one write containing two packets.
        let packet = client.recv().await.unwrap();
        let parsed = parse_packets(&packet);
        assert_eq!(parsed, vec![(0x44, vec![1, 2]), (0x44, vec![3])]);
        // Nothing further queued.
        assert!(client.try_recv().is_err());
    }

    #[tokio::test]
    async fn audio_bypasses_the_batch() {
        let broadcaster = TcpBroadcaster::new();
        let (_id, mut client) = register_fake(&broadcaster);

        broadcaster.send_audio(&[9, 9]);
        let packet = client.recv().await.unwrap();
        assert_eq!(parse_packets(&packet), vec![(0x41, vec![9, 9])]);
        assert!(broadcaster.batch.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dead_client_does_not_stall_siblings() {
        let broadcaster = TcpBroadcaster::new();
        let (_id_a, client_a) = register_fake(&broadcaster);
        let (_id_b, mut client_b) = register_fake(&broadcaster);

        // A's receiver goes away mid-stream.
        drop(client_a);

        broadcaster.queue_display(&[7, 7, 7]);
        broadcaster.flush_batch();

        assert_eq!(broadcaster.client_count(), 1);
        let packet = client_b.recv().await.unwrap();
        // B's packet arrives whole; no packet is ever split.
        assert_eq!(parse_packets(&packet), vec![(0x44, vec![7, 7, 7])]);
    }

    #[tokio::test]
    async fn no_clients_means_no_batching_work() {
        let broadcaster = TcpBroadcaster::new();
        broadcaster.queue_display(&[1]);
        assert!(broadcaster.batch.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_flushes() {
        let broadcaster = TcpBroadcaster::new();
        let (_id, mut client) = register_fake(&broadcaster);
        broadcaster.queue_display(&[5]);
        broadcaster.shutdown();
        broadcaster.shutdown();

        let packet = client.try_recv().expect("flushed batch");
        assert_eq!(parse_packets(&packet), vec![(0x44, vec![5])]);
        assert_eq!(broadcaster.client_count(), 0);
    }

    #[tokio::test]
    async fn listener_binds_and_shuts_down() {
        let config = GatewayConfig {
            auto_reconnect: false,
            ..GatewayConfig::default()
        };
        let (link, _chunks) = SerialLink::new(&config);
        let broadcaster = TcpBroadcaster::new();
        // Port 0: the OS picks a free port; bind must succeed.
        broadcaster.start(0, Arc::clone(&link)).await.unwrap();
        broadcaster.shutdown();
        assert_eq!(broadcaster.client_count(), 0);
    }
}
