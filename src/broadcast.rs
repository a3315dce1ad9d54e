//! Fan-out of server frames to every live connection.
//!
//! One tokio broadcast channel carries pre-encoded frames as shared
//! bytes: a frame is serialized once, then every connection task's
//! receiver hands out the same `Arc`. Delivery is best effort — a
//! receiver that lags past the channel capacity drops the oldest frames
//! and its connection logs the gap; there is no retry queue, and a
//! connection that closed mid-broadcast simply never sees the frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::protocol::{ProtocolError, ServerFrame};

/// Snapshot of router health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub frames_published: u64,
    pub active_receivers: usize,
}

/// The relay's single fan-out primitive.
pub struct BroadcastRouter {
    sender: broadcast::Sender<Arc<Vec<u8>>>,
    capacity: usize,
    frames_published: AtomicU64,
}

impl BroadcastRouter {
    /// `capacity` is how many frames a slow connection may fall behind
    /// before it starts losing them.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            frames_published: AtomicU64::new(0),
        }
    }

    /// Register a connection; the receiver buffers up to `capacity`
    /// frames published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Vec<u8>>> {
        self.sender.subscribe()
    }

    /// Encode a frame once and hand it to every receiver.
    ///
    /// Returns the number of receivers the frame reached. Publishing to
    /// zero receivers is not an error.
    pub fn publish(&self, frame: &ServerFrame) -> Result<usize, ProtocolError> {
        let encoded = Arc::new(frame.encode()?);
        Ok(self.publish_raw(encoded))
    }

    /// Fan out pre-encoded bytes (lock-free).
    pub fn publish_raw(&self, encoded: Arc<Vec<u8>>) -> usize {
        let reached = self.sender.send(encoded).unwrap_or(0);
        self.frames_published.fetch_add(1, Ordering::Relaxed);
        reached
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            frames_published: self.frames_published.load(Ordering::Relaxed),
            active_receivers: self.sender.receiver_count(),
        }
    }
}
