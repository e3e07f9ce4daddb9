//! # chat-relay
//!
//! Chat relay server binary: loads settings, initializes logging and metrics,
//! and serves the WebSocket relay until Ctrl-C or SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use relay_core::logging::init_subscriber;
use relay_server::shutdown::wait_for_signal;
use relay_server::{RelayServer, ServerConfig};
use relay_settings::{RelaySettings, load_settings, load_settings_from_path, settings_path};
use tracing::info;

/// Chat relay server.
#[derive(Parser, Debug)]
#[command(name = "chat-relay", about = "WebSocket chat relay server")]
struct Cli {
    /// Settings file (defaults to `~/.chat-relay/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings and `PORT`).
    #[arg(long)]
    port: Option<u16>,

    /// Log filter, e.g. `info` or `relay_core=debug` (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Resolve settings: defaults, file, environment, then flags.
    fn load_settings(&self) -> Result<RelaySettings> {
        let mut settings = match &self.config {
            Some(path) => {
                anyhow::ensure!(path.exists(), "config file not found: {}", path.display());
                load_settings_from_path(path)
                    .with_context(|| format!("failed to load settings from {}", path.display()))?
            }
            None => load_settings().with_context(|| {
                format!("failed to load settings from {}", settings_path().display())
            })?,
        };
        self.apply(&mut settings);
        Ok(settings)
    }

    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

fn server_config(settings: &RelaySettings) -> ServerConfig {
    let s = &settings.server;
    ServerConfig {
        host: s.host.clone(),
        port: s.port,
        max_connections: s.max_connections,
        heartbeat_interval_secs: s.heartbeat_interval_secs,
        heartbeat_timeout_secs: s.heartbeat_timeout_secs,
        max_message_size: s.max_message_size,
        outbound_queue: s.outbound_queue,
        allowed_origins: settings.cors.allowed_origins.clone(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;

    init_subscriber(&settings.logging.level, settings.logging.format);

    let metrics =
        relay_server::metrics::install_recorder().context("failed to install metrics recorder")?;
    let server = RelayServer::new(server_config(&settings), metrics);

    let addr = server.listen().await.context("failed to bind server")?;
    info!(
        %addr,
        max_connections = settings.server.max_connections,
        "chat relay ready on ws://{addr}/ws"
    );

    wait_for_signal().await;

    info!("shutting down");
    server.shutdown().graceful_shutdown(None).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::logging::LogFormat;

    #[test]
    fn cli_defaults_are_unset() {
        let cli = Cli::parse_from(["chat-relay"]);
        assert!(cli.config.is_none());
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert!(cli.log_level.is_none());
    }

    #[test]
    fn cli_parses_all_flags() {
        let cli = Cli::parse_from([
            "chat-relay",
            "--config",
            "/etc/relay.json",
            "--host",
            "127.0.0.1",
            "--port",
            "8080",
            "--log-level",
            "debug",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/relay.json")));
        assert_eq!(cli.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(cli.port, Some(8080));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn cli_rejects_invalid_port() {
        assert!(Cli::try_parse_from(["chat-relay", "--port", "70000"]).is_err());
    }

    #[test]
    fn flags_override_settings() {
        let cli = Cli::parse_from(["chat-relay", "--port", "4000", "--log-level", "warn"]);
        let mut settings = RelaySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.port, 4000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.logging.level, "warn");
    }

    #[test]
    fn explicit_config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(
            &path,
            r#"{"server":{"maxConnections":7},"logging":{"format":"json"}}"#,
        )
        .unwrap();

        let cli = Cli::parse_from([
            "chat-relay",
            "--config",
            path.to_str().unwrap(),
            "--host",
            "127.0.0.1",
        ]);
        let settings = cli.load_settings().unwrap();
        assert_eq!(settings.server.max_connections, 7);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let cli = Cli::parse_from(["chat-relay", "--config", path.to_str().unwrap()]);
        let err = cli.load_settings().unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn invalid_config_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ nope").unwrap();
        let cli = Cli::parse_from(["chat-relay", "--config", path.to_str().unwrap()]);
        let err = cli.load_settings().unwrap_err();
        assert!(format!("{err:#}").contains("bad.json"));
    }

    #[test]
    fn server_config_mirrors_settings() {
        let mut settings = RelaySettings::default();
        settings.server.port = 9000;
        settings.server.outbound_queue = 32;
        settings.cors.allowed_origins = vec!["https://app.test".into()];

        let cfg = server_config(&settings);
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.outbound_queue, 32);
        assert_eq!(cfg.max_connections, 1024);
        assert_eq!(cfg.heartbeat_interval_secs, 25);
        assert_eq!(cfg.allowed_origins, vec!["https://app.test"]);
    }

    #[tokio::test]
    async fn server_boots_from_settings_and_shuts_down() {
        let mut settings = RelaySettings::default();
        settings.server.host = "127.0.0.1".into();
        settings.server.port = 0;

        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle();
        let server = RelayServer::new(server_config(&settings), handle);
        let addr = server.listen().await.unwrap();

        let body: serde_json::Value = reqwest::get(format!("http://{addr}/"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");

        server
            .shutdown()
            .graceful_shutdown(Some(std::time::Duration::from_secs(5)))
            .await;
        assert!(server.shutdown().is_shutting_down());
    }
}
