//! # relay-server
//!
//! Axum HTTP + `WebSocket` gateway in front of the relay dispatcher.
//!
//! - HTTP endpoints: `/` and `/health` status, `/metrics` Prometheus text
//! - `WebSocket` gateway at `/ws`: one session task per connection, heartbeat,
//!   frame decoding
//! - A single relay task owns the [`RelayDispatcher`](relay_core::RelayDispatcher)
//!   and consumes every session's events in arrival order
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod relay;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::RelayServer;
