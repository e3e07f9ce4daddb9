//! `/` and `/health` endpoint body.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Human-readable liveness line.
    pub message: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Live WebSocket connections.
    pub connections: usize,
    /// Identities currently bound to a connection.
    pub registered_users: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize, registered: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        message: "Chat relay is running".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        registered_users: registered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), 0, 0);
        assert_eq!(resp.status, "ok");
        assert_eq!(resp.message, "Chat relay is running");
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, 0, 0);
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let resp = health_check(Instant::now(), 2, 1);
        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 2);
        assert_eq!(parsed["registered_users"], 1);
        assert!(parsed["uptime_secs"].is_number());
    }
}
