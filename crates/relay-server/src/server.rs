//! `RelayServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_core::{ConnectionId, ConnectionRegistry, InMemoryRegistry, RelayDispatcher};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics::{WS_REJECTED_TOTAL, render};
use crate::relay::{self, RELAY_CHANNEL_CAPACITY, RelayHandle, RelayStats, run_relay_loop};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::{SessionOptions, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Sender side of the relay channel.
    pub relay: RelayHandle,
    /// Counters published by the relay task.
    pub stats: Arc<RelayStats>,
    /// Upgraded connections currently holding a slot.
    pub active: Arc<AtomicUsize>,
    /// Upgrade limit.
    pub max_connections: usize,
    /// Largest accepted inbound frame.
    pub max_message_size: usize,
    /// Heartbeat and queue settings for new sessions.
    pub session: SessionOptions,
    /// Server-wide shutdown token.
    pub shutdown: CancellationToken,
    /// Prometheus handle for `/metrics`.
    pub metrics: PrometheusHandle,
    /// When the server started.
    pub start_time: Instant,
}

/// The chat relay server.
pub struct RelayServer {
    config: ServerConfig,
    relay: RelayHandle,
    stats: Arc<RelayStats>,
    active: Arc<AtomicUsize>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: PrometheusHandle,
    start_time: Instant,
}

impl RelayServer {
    /// Create a server backed by an [`InMemoryRegistry`].
    ///
    /// Spawns the relay task, so this must run inside a Tokio runtime.
    pub fn new(config: ServerConfig, metrics: PrometheusHandle) -> Self {
        Self::with_registry(config, InMemoryRegistry::new(), metrics)
    }

    /// Create a server backed by `registry`.
    pub fn with_registry<R>(config: ServerConfig, registry: R, metrics: PrometheusHandle) -> Self
    where
        R: ConnectionRegistry + 'static,
    {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let stats = Arc::new(RelayStats::default());
        let (relay, rx) = relay::channel(RELAY_CHANNEL_CAPACITY);

        shutdown.track(tokio::spawn(run_relay_loop(
            RelayDispatcher::new(registry),
            rx,
            stats.clone(),
            shutdown.token(),
        )));

        Self {
            config,
            relay,
            stats,
            active: Arc::new(AtomicUsize::new(0)),
            shutdown,
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            relay: self.relay.clone(),
            stats: self.stats.clone(),
            active: self.active.clone(),
            max_connections: self.config.max_connections,
            max_message_size: self.config.max_message_size,
            session: SessionOptions {
                heartbeat_interval: self.config.heartbeat_interval(),
                heartbeat_timeout: self.config.heartbeat_timeout(),
                outbound_queue: self.config.outbound_queue,
            },
            shutdown: self.shutdown.token(),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
        };

        Router::new()
            .route("/", get(health_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .with_state(state)
            .layer(cors_layer(&self.config.allowed_origins))
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the listener and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`). The serve task is
    /// tracked by the shutdown coordinator.
    pub async fn listen(&self) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "chat relay listening");

        let router = self.router();
        let token = self.shutdown.token();
        self.shutdown.track(tokio::spawn(async move {
            let serve = axum::serve(listener, router).with_graceful_shutdown(token.cancelled_owned());
            if let Err(e) = serve.await {
                error!(error = %e, "http server failed");
            }
        }));
        Ok(addr)
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }
}

/// GET / and GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.stats.connections(),
        state.stats.registered(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    render(&state.metrics)
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let Some(slot) = ConnectionSlot::acquire(&state.active, state.max_connections) else {
        warn!(limit = state.max_connections, "connection limit reached, upgrade refused");
        counter!(WS_REJECTED_TOTAL).increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    };

    let conn_id = ConnectionId::new();
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| async move {
            let _slot = slot;
            run_ws_session(socket, conn_id, state.relay, state.session, state.shutdown).await;
        })
        .into_response()
}

/// One of `max_connections` upgrade slots, released on drop.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn acquire(active: &Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        let _ = active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .ok()?;
        Some(Self(active.clone()))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Any origin when `origins` is empty, otherwise exactly the listed ones.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "invalid CORS origin ignored");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}
