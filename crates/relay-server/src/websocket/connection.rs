//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use relay_core::{ConnectionId, ConnectionSink, SinkError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Represents a connected WebSocket client.
///
/// The relay task holds it as an `Arc<dyn ConnectionSink>`; the session keeps
/// another reference for liveness tracking.
pub struct ClientConnection {
    /// Connection handle.
    pub id: ConnectionId,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// Whether any frame arrived since the last heartbeat check.
    is_alive: AtomicBool,
    /// When the last inbound frame was received.
    last_seen: Mutex<Instant>,
    /// Count of frames dropped due to a full queue.
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record inbound activity (any frame, including Pong).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Duration since the last inbound frame (or connection establishment).
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }
}

impl ConnectionSink for ClientConnection {
    fn try_send(&self, frame: Arc<String>) -> Result<(), SinkError> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(SinkError::Full)
            }
            Err(TrySendError::Closed(_)) => Err(SinkError::Closed),
        }
    }
}
