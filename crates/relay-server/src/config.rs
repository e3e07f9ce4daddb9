//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind (`0` auto-assigns).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Close a connection after this many seconds without any inbound frame.
    pub heartbeat_timeout_secs: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue capacity.
    pub outbound_queue: usize,
    /// Allowed CORS origins. Empty allows any origin.
    pub allowed_origins: Vec<String>,
}

impl ServerConfig {
    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Heartbeat interval as a `Duration`.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Heartbeat timeout as a `Duration`.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            max_connections: 1024,
            heartbeat_interval_secs: 25,
            heartbeat_timeout_secs: 60,
            max_message_size: 64 * 1024,
            outbound_queue: 256,
            allowed_origins: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.max_connections, 1024);
        assert_eq!(cfg.heartbeat_interval_secs, 25);
        assert_eq!(cfg.heartbeat_timeout_secs, 60);
        assert_eq!(cfg.max_message_size, 64 * 1024);
        assert_eq!(cfg.outbound_queue, 256);
        assert!(cfg.allowed_origins.is_empty());
    }

    #[test]
    fn bind_addr_joins_host_and_port() {
        let cfg = ServerConfig {
            host: "127.0.0.1".into(),
            port: 8080,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.bind_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn durations() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(25));
        assert_eq!(cfg.heartbeat_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn deserialize_from_json_string() {
        let json = r#"{"host":"10.0.0.1","port":3000,"max_connections":5,"heartbeat_interval_secs":10,"heartbeat_timeout_secs":30,"max_message_size":512,"outbound_queue":8,"allowed_origins":["https://a.test"]}"#;
        let cfg: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.host, "10.0.0.1");
        assert_eq!(cfg.max_connections, 5);
        assert_eq!(cfg.outbound_queue, 8);
        assert_eq!(cfg.allowed_origins, vec!["https://a.test"]);
    }
}
