//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every section is `#[serde(default)]`, so
//! a settings file only needs the keys it changes.

use relay_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings for the relay.
///
/// ```json
/// {
///   "server": { "port": 3000, "maxConnections": 2048 },
///   "logging": { "level": "debug" },
///   "cors": { "allowedOrigins": ["https://app.example.com"] }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Listener and connection limits.
    pub server: ServerSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// Cross-origin policy for the HTTP surface.
    pub cors: CorsSettings,
}

impl RelaySettings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.server;
        if s.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxConnections must be at least 1".into(),
            ));
        }
        if s.outbound_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "server.outboundQueue must be at least 1".into(),
            ));
        }
        if s.heartbeat_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalSecs must be at least 1".into(),
            ));
        }
        if s.heartbeat_timeout_secs < s.heartbeat_interval_secs {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatTimeoutSecs must not be shorter than the interval".into(),
            ));
        }
        Ok(())
    }
}

/// Server network and runtime settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (`0` picks a free port).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Seconds between server Ping frames.
    pub heartbeat_interval_secs: u64,
    /// Seconds of silence before a connection is dropped.
    pub heartbeat_timeout_secs: u64,
    /// Largest accepted inbound frame, in bytes.
    pub max_message_size: usize,
    /// Frames buffered per connection before new ones are dropped.
    pub outbound_queue: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_connections: 1024,
            heartbeat_interval_secs: 25,
            heartbeat_timeout_secs: 60,
            max_message_size: 64 * 1024,
            outbound_queue: 256,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// CORS settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CorsSettings {
    /// Allowed origins. Empty allows any origin.
    pub allowed_origins: Vec<String>,
}
