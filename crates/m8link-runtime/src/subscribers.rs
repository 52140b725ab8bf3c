//! Transport-membership registry shared by the fan-out channels.
//!
//! Each consumer is a bounded byte channel; the sender lives here, the
//! receiver is drained by that consumer's egress task (a WebSocket writer, a
//! TCP writer). Emission iterates a snapshot of the membership, writes with
//! `try_send` so a stalled consumer can never block the producer, and defers
//! removal of dead entries until after the loop.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Per-consumer queue depth before a consumer counts as stalled.
const CONSUMER_QUEUE: usize = 64;

/// A set of live consumers for one fan-out channel.
#[derive(Debug)]
pub struct SubscriberSet {
    name: &'static str,
    inner: Mutex<HashMap<u64, mpsc::Sender<Vec<u8>>>>,
    next_id: AtomicU64,
}

impl SubscriberSet {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a consumer; returns its id and the receiving end its egress
    /// task drains.
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(CONSUMER_QUEUE);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().unwrap().insert(id, tx);
        debug!(channel = self.name, id, "consumer subscribed");
        (id, rx)
    }

    /// Remove a consumer on lifecycle close.
    pub fn unsubscribe(&self, id: u64) {
        if self.inner.lock().unwrap().remove(&id).is_some() {
            debug!(channel = self.name, id, "consumer unsubscribed");
        }
    }

    /// Live consumer count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// Send `payload` to every consumer; consumers whose queue is full or
    /// whose receiver is gone are dropped from the set. Returns how many
    /// consumers received the payload.
    pub fn broadcast(&self, payload: &[u8]) -> usize {
        // Snapshot so subscribe/unsubscribe may race with the send loop.
        let snapshot: Vec<(u64, mpsc::Sender<Vec<u8>>)> = self
            .inner
            .lock()
            .unwrap()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();
        if snapshot.is_empty() {
            return 0;
        }

        let mut dead = Vec::new();
        let mut delivered = 0;
        for (id, tx) in snapshot {
            match tx.try_send(payload.to_vec()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(channel = self.name, id, "consumer stalled, dropping");
                    dead.push(id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => dead.push(id),
            }
        }

        if !dead.is_empty() {
            let mut inner = self.inner.lock().unwrap();
            for id in dead {
                inner.remove(&id);
            }
        }
        delivered
    }
}
