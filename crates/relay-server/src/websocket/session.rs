//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use relay_core::ConnectionId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use super::handler::handle_frame;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::relay::{RelayEvent, RelayHandle};

/// Per-session timing and buffering.
#[derive(Clone, Copy, Debug)]
pub struct SessionOptions {
    /// Interval between server Ping frames and heartbeat checks.
    pub heartbeat_interval: Duration,
    /// Silence after which the connection is closed.
    pub heartbeat_timeout: Duration,
    /// Outbound queue capacity.
    pub outbound_queue: usize,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    ClientClosed,
    FrameTooLarge,
    ReadError,
    HeartbeatTimeout,
    WriterGone,
    Shutdown,
}

/// Run a WebSocket session for a connected client.
///
/// 1. Announces the connection to the relay task
/// 2. Decodes incoming frames and forwards valid events
/// 3. Drains the outbound queue into the socket, with periodic Pings
/// 4. Closes silent clients after the heartbeat timeout
/// 5. Announces the disconnect, always as the connection's last event
#[instrument(skip_all, fields(conn_id = %conn_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    conn_id: ConnectionId,
    relay: RelayHandle,
    options: SessionOptions,
    cancel: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(options.outbound_queue.max(1));
    let connection = Arc::new(ClientConnection::new(conn_id.clone(), send_tx));

    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    let connection_start = Instant::now();

    if !relay
        .send(RelayEvent::Connected {
            conn: conn_id.clone(),
            sink: connection.clone(),
        })
        .await
    {
        warn!("relay loop unavailable, closing connection");
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        return;
    }

    // Outbound writer with periodic Ping frames.
    let ping_every = options.heartbeat_interval;
    let mut outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(ping_every);
        // Skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(String::clone(&text).into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    let heartbeat_cancel = cancel.child_token();
    let heartbeat = run_heartbeat(
        connection.clone(),
        options.heartbeat_interval,
        options.heartbeat_timeout,
        heartbeat_cancel.clone(),
    );
    tokio::pin!(heartbeat);

    let reason = loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) if is_frame_too_large(&e) => {
                        warn!(error = %e, "frame exceeds size limit, closing connection");
                        break CloseReason::FrameTooLarge;
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket read failed");
                        break CloseReason::ReadError;
                    }
                    None => break CloseReason::ClientClosed,
                };
                connection.mark_alive();

                let text = match msg {
                    Message::Text(ref t) => t.as_str(),
                    Message::Binary(ref data) => match std::str::from_utf8(data) {
                        Ok(s) => s,
                        Err(_) => {
                            warn!(len = data.len(), "non-UTF8 binary frame discarded");
                            continue;
                        }
                    },
                    Message::Close(_) => break CloseReason::ClientClosed,
                    Message::Ping(_) | Message::Pong(_) => continue,
                };

                if let Some(event) = handle_frame(text) {
                    let inbound = RelayEvent::Inbound { conn: conn_id.clone(), event };
                    if !relay.send(inbound).await {
                        break CloseReason::Shutdown;
                    }
                }
            }
            result = &mut heartbeat => {
                match result {
                    HeartbeatResult::TimedOut => {
                        warn!(
                            idle_secs = connection.idle_for().as_secs(),
                            "client unresponsive, disconnecting"
                        );
                        break CloseReason::HeartbeatTimeout;
                    }
                    HeartbeatResult::Cancelled => break CloseReason::Shutdown,
                }
            }
            _ = &mut outbound => break CloseReason::WriterGone,
        }
    };

    heartbeat_cancel.cancel();
    let _ = relay
        .send(RelayEvent::Disconnected {
            conn: conn_id.clone(),
        })
        .await;
    let dropped = connection.drop_count();
    // Dropping our sink lets the writer flush what is queued and close.
    drop(connection);
    if reason != CloseReason::WriterGone
        && tokio::time::timeout(Duration::from_secs(1), &mut outbound)
            .await
            .is_err()
    {
        outbound.abort();
    }

    info!(
        reason = ?reason,
        dropped,
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection_start.elapsed().as_secs_f64());
}

/// Whether a read failed because the client sent a frame over
/// `max_message_size`. The transport reports this as a capacity error.
fn is_frame_too_large(err: &axum::Error) -> bool {
    err.to_string().contains("Message too long")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_are_copy() {
        let opts = SessionOptions {
            heartbeat_interval: Duration::from_secs(25),
            heartbeat_timeout: Duration::from_secs(60),
            outbound_queue: 256,
        };
        let copy = opts;
        assert_eq!(copy.outbound_queue, opts.outbound_queue);
    }

    #[test]
    fn capacity_error_is_classified_as_too_large() {
        let err = axum::Error::new(std::io::Error::other(
            "Space limit exceeded: Message too long: 4096 > 1024",
        ));
        assert!(is_frame_too_large(&err));
    }

    #[test]
    fn other_read_errors_are_not_too_large() {
        let err = axum::Error::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ));
        assert!(!is_frame_too_large(&err));
    }

    #[test]
    fn close_reasons_debug() {
        assert_eq!(format!("{:?}", CloseReason::HeartbeatTimeout), "HeartbeatTimeout");
    }
}
