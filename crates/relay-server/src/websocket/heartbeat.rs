//! Heartbeat liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use super::connection::ClientConnection;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The client sent nothing within the timeout window.
    TimedOut,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Number of consecutive silent intervals tolerated before timing out.
///
/// `timeout / interval`, at least 1.
pub fn max_missed(interval: Duration, timeout: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    let ratio = timeout.as_millis() / interval_ms;
    u32::try_from(ratio).unwrap_or(u32::MAX).max(1)
}

/// Watch a connection's alive flag until it goes silent or `cancel` fires.
///
/// At each `interval` tick the flag is checked and reset. Inbound frames set
/// it again. After [`max_missed`] consecutive silent ticks the connection is
/// considered dead.
pub async fn run_heartbeat(
    connection: Arc<ClientConnection>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut check_interval = time::interval(interval);
    // The first tick completes immediately.
    let _ = check_interval.tick().await;
    let max_missed = max_missed(interval, timeout);
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                if connection.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::ConnectionId;
    use tokio::sync::mpsc;

    fn make_connection() -> Arc<ClientConnection> {
        let (tx, _rx) = mpsc::channel(4);
        Arc::new(ClientConnection::new(ConnectionId::from_string("hb_conn".into()), tx))
    }

    #[test]
    fn max_missed_ratio() {
        assert_eq!(max_missed(Duration::from_secs(25), Duration::from_secs(60)), 2);
        assert_eq!(max_missed(Duration::from_millis(100), Duration::from_millis(300)), 3);
        assert_eq!(max_missed(Duration::from_secs(30), Duration::from_secs(10)), 1);
        assert_eq!(max_missed(Duration::ZERO, Duration::ZERO), 1);
    }

    #[tokio::test]
    async fn heartbeat_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run_heartbeat(
            make_connection(),
            Duration::from_secs(100),
            Duration::from_secs(300),
            cancel,
        )
        .await;
        assert_eq!(result, HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_connection_times_out() {
        let conn = make_connection();
        let _ = conn.check_alive();
        let result = run_heartbeat(
            conn,
            Duration::from_millis(100),
            Duration::from_millis(300),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result, HeartbeatResult::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn active_connection_stays_alive() {
        let conn = make_connection();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_heartbeat(
            conn.clone(),
            Duration::from_millis(100),
            Duration::from_millis(200),
            cancel.clone(),
        ));

        for _ in 0..10 {
            time::sleep(Duration::from_millis(50)).await;
            conn.mark_alive();
        }

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }
}
