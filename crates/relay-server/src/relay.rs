//! The relay task.
//!
//! Sessions never touch the dispatcher directly. They push [`RelayEvent`]s
//! into one bounded channel and a single task applies them in arrival order,
//! so the registry needs no lock and a connection's events are handled in the
//! order its session sent them.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use metrics::counter;
use relay_core::{
    ConnectionId, ConnectionRegistry, ConnectionSink, DeliveryResult, InboundEvent,
    RelayDispatcher,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::metrics::{RELAY_MESSAGES_TOTAL, RELAY_REGISTRATIONS_TOTAL};

/// Capacity of the session → relay channel.
pub const RELAY_CHANNEL_CAPACITY: usize = 1024;

/// One unit of work for the relay task.
pub enum RelayEvent {
    /// A WebSocket upgrade completed.
    Connected {
        /// New connection handle.
        conn: ConnectionId,
        /// Outbound queue of the connection.
        sink: Arc<dyn ConnectionSink>,
    },
    /// A decoded client event.
    Inbound {
        /// Connection the frame arrived on.
        conn: ConnectionId,
        /// The event.
        event: InboundEvent,
    },
    /// The connection is gone. Always the last event for `conn`.
    Disconnected {
        /// Closed connection handle.
        conn: ConnectionId,
    },
}

impl std::fmt::Debug for RelayEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected { conn, .. } => f.debug_struct("Connected").field("conn", conn).finish(),
            Self::Inbound { conn, event } => f
                .debug_struct("Inbound")
                .field("conn", conn)
                .field("event", &event.name())
                .finish(),
            Self::Disconnected { conn } => {
                f.debug_struct("Disconnected").field("conn", conn).finish()
            }
        }
    }
}

/// Cloneable sender side of the relay channel.
#[derive(Clone)]
pub struct RelayHandle {
    tx: mpsc::Sender<RelayEvent>,
}

impl RelayHandle {
    /// Queue an event for the relay task.
    ///
    /// Waits for channel capacity. Returns `false` once the relay task is gone.
    pub async fn send(&self, event: RelayEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }
}

/// Counters published by the relay task for the health endpoint.
#[derive(Debug, Default)]
pub struct RelayStats {
    connections: AtomicUsize,
    registered: AtomicUsize,
}

impl RelayStats {
    /// Live connections known to the dispatcher.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Identities currently bound.
    pub fn registered(&self) -> usize {
        self.registered.load(Ordering::Relaxed)
    }

    fn publish<R: ConnectionRegistry>(&self, dispatcher: &RelayDispatcher<R>) {
        self.connections
            .store(dispatcher.connection_count(), Ordering::Relaxed);
        self.registered
            .store(dispatcher.registered_count(), Ordering::Relaxed);
    }
}

/// Create the relay channel.
pub fn channel(capacity: usize) -> (RelayHandle, mpsc::Receiver<RelayEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (RelayHandle { tx }, rx)
}

/// Apply one event to the dispatcher.
///
/// Returns the delivery outcome for `send_message` events.
pub fn apply<R: ConnectionRegistry>(
    dispatcher: &mut RelayDispatcher<R>,
    event: RelayEvent,
) -> Option<DeliveryResult> {
    match event {
        RelayEvent::Connected { conn, sink } => {
            dispatcher.on_connect(conn, sink);
            None
        }
        RelayEvent::Inbound {
            conn,
            event: InboundEvent::Register(user),
        } => {
            if dispatcher.on_register(&conn, user) {
                counter!(RELAY_REGISTRATIONS_TOTAL).increment(1);
            }
            None
        }
        RelayEvent::Inbound {
            conn,
            event: InboundEvent::SendMessage(msg),
        } => {
            let outcome = dispatcher.on_message(&conn, msg);
            counter!(RELAY_MESSAGES_TOTAL, "outcome" => outcome.as_str()).increment(1);
            Some(outcome)
        }
        RelayEvent::Disconnected { conn } => {
            let _ = dispatcher.on_disconnect(&conn);
            None
        }
    }
}

/// Drive `dispatcher` until every sender is dropped or `cancel` fires.
///
/// Events already queued when `cancel` fires are still applied.
pub async fn run_relay_loop<R: ConnectionRegistry>(
    mut dispatcher: RelayDispatcher<R>,
    mut rx: mpsc::Receiver<RelayEvent>,
    stats: Arc<RelayStats>,
    cancel: CancellationToken,
) {
    info!("relay loop started");
    loop {
        let event = tokio::select! {
            biased;
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
            () = cancel.cancelled() => {
                rx.close();
                while let Some(event) = rx.recv().await {
                    let _ = apply(&mut dispatcher, event);
                }
                break;
            }
        };
        let _ = apply(&mut dispatcher, event);
        stats.publish(&dispatcher);
    }
    stats.publish(&dispatcher);
    debug!(
        connections = dispatcher.connection_count(),
        registered = dispatcher.registered_count(),
        "relay loop stopped"
    );
}
