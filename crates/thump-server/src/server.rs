//! `ThumpServer`: axum router, listener and background tasks.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use futures::StreamExt;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use thump_core::{ClientIdAllocator, ClockAuthority};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::bus::{BusHandle, EventBus};
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::robo;
use crate::session::{SessionContext, run_session};
use crate::shutdown::ShutdownCoordinator;

const HEALTH_PATH: &str = "/health";
const METRICS_PATH: &str = "/metrics";

/// State shared by the axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Event bus.
    pub bus: BusHandle,
    /// Client id source.
    pub ids: Arc<ClientIdAllocator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server was created.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The relay server.
pub struct ThumpServer {
    config: Arc<ServerConfig>,
    bus: BusHandle,
    idle_bus: Mutex<Option<EventBus>>,
    ids: Arc<ClientIdAllocator>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl ThumpServer {
    /// Create a server. Nothing runs until [`listen`](Self::listen).
    pub fn new(config: ServerConfig, metrics: Option<PrometheusHandle>) -> Self {
        let clock = ClockAuthority::new(config.default_bpm);
        let (bus, handle) = EventBus::new(clock, config.command_queue_capacity);
        Self {
            config: Arc::new(config),
            bus: handle,
            idle_bus: Mutex::new(Some(bus)),
            ids: Arc::new(ClientIdAllocator::new()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics,
        }
    }

    /// Build the router: WebSocket paths, `/health`, `/metrics`, and a 404
    /// for everything else.
    pub fn router(&self) -> Router {
        let state = AppState {
            bus: self.bus.clone(),
            ids: Arc::clone(&self.ids),
            config: Arc::clone(&self.config),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        let mut router = Router::new()
            .route(HEALTH_PATH, get(health_handler))
            .route(METRICS_PATH, get(metrics_handler));

        let paths: BTreeSet<&str> = self.config.ws_paths.iter().map(String::as_str).collect();
        for path in paths {
            if path == HEALTH_PATH || path == METRICS_PATH {
                warn!(path, "websocket path collides with a built-in route, skipping");
                continue;
            }
            router = router.route(path, get(ws_handler));
        }

        router
            .fallback(not_found)
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind, start the bus (and the simulated participant, if enabled), and
    /// serve until shutdown.
    ///
    /// Returns the bound address and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;

        self.start_background();

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server error");
            }
        });

        info!(%addr, paths = ?self.config.ws_paths, "thump listening");
        Ok((addr, handle))
    }

    fn start_background(&self) {
        let Some(bus) = self.idle_bus.lock().take() else {
            return;
        };
        self.shutdown
            .track(tokio::spawn(bus.run(self.shutdown.token())));

        if self.config.robo.enabled {
            let client_id = self.ids.allocate();
            self.shutdown.track(robo::spawn(
                self.config.robo.clone(),
                client_id,
                self.bus.clone(),
                self.shutdown.token(),
            ));
        }
    }

    /// Signal shutdown and wait for background tasks.
    pub async fn stop(&self, timeout: Option<Duration>) {
        self.shutdown.graceful_shutdown(timeout).await;
    }

    /// Event bus handle.
    pub fn bus(&self) -> &BusHandle {
        &self.bus
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET on a WebSocket path.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let client_id = state.ids.allocate();
    let (sink, stream) = socket.split();
    let ctx = SessionContext {
        client_id,
        bus: state.bus,
        mailbox_capacity: state.config.mailbox_capacity,
        max_write_failures: state.config.max_write_failures,
        shutdown: state.shutdown.token(),
    };
    run_session(sink, stream, ctx).await;
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.bus.stats().addressable(),
        state.bus.clock().bpm(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}
