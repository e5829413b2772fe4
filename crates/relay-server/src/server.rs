//! `RelayServer`: Axum HTTP + WebSocket listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::rejection::QueryRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Query, State};
use axum::http::header::{CONTENT_TYPE, ORIGIN, UPGRADE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::errors::RelayError;
use crate::health::{self, HealthResponse};
use crate::metrics;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::connection::{ConnectionId, Role};
use crate::websocket::heartbeat::HeartbeatMonitor;
use crate::websocket::registry::ClientRegistry;
use crate::websocket::session::run_session;

/// Body served to plain HTTP requests on relay paths.
pub const BANNER: &str = "WebSocket Relay Server\n";

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection registry.
    pub registry: Arc<ClientRegistry>,
    /// Shutdown coordinator.
    pub shutdown: ShutdownCoordinator,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`.
    pub metrics_handle: PrometheusHandle,
}

/// The relay server.
pub struct RelayServer {
    config: Arc<ServerConfig>,
    registry: Arc<ClientRegistry>,
    shutdown: ShutdownCoordinator,
    start_time: Instant,
    metrics_handle: PrometheusHandle,
}

impl RelayServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, metrics_handle: PrometheusHandle) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(ClientRegistry::new()),
            shutdown: ShutdownCoordinator::new(),
            start_time: Instant::now(),
            metrics_handle,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: Arc::clone(&self.registry),
            shutdown: self.shutdown.clone(),
            config: Arc::clone(&self.config),
            start_time: self.start_time,
            metrics_handle: self.metrics_handle.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .fallback(relay_handler)
            .with_state(state)
            .layer(cors_layer(&self.config.allowed_origins))
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the listener and start serving.
    ///
    /// Returns the bound address and a handle that completes once the
    /// listener, the heartbeat and every session have stopped after
    /// [`ShutdownCoordinator::shutdown`].
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), RelayError> {
        let bind = self.config.bind_address();
        let addr = tokio::net::lookup_host(&bind)
            .await
            .map_err(|source| RelayError::Resolve {
                addr: bind.clone(),
                source,
            })?
            .next()
            .ok_or_else(|| RelayError::Resolve {
                addr: bind.clone(),
                source: std::io::Error::other("no addresses resolved"),
            })?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RelayError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        info!(
            %local_addr,
            heartbeat_ms = self.config.heartbeat_interval_ms,
            origins = ?self.config.allowed_origins,
            "relay server listening"
        );

        let router = self.router();
        let shutdown = self.shutdown.clone();
        let token = shutdown.token();
        let monitor = HeartbeatMonitor::new(Arc::clone(&self.registry), self.config.heartbeat_interval());

        let handle = tokio::spawn(async move {
            let heartbeat = tokio::spawn(monitor.run(token.clone()));
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "relay server error");
            }
            let _ = heartbeat.await;
            shutdown.sessions_drained().await;
            info!("relay server stopped");
        });

        Ok((local_addr, handle))
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring unparseable allowed origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET])
}

/// Connect-time query parameters.
#[derive(Debug, Default, Deserialize)]
struct ConnectParams {
    #[serde(rename = "clientType")]
    client_type: Option<String>,
}

/// Any path: WebSocket upgrade into a relay session, else the banner.
async fn relay_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    params: Result<Query<ConnectParams>, QueryRejection>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let wants_upgrade = headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    if wants_upgrade {
        if let Some(origin) = headers.get(ORIGIN) {
            let origin = origin.to_str().unwrap_or_default();
            if !state.config.is_origin_allowed(origin) {
                if state.config.enforce_origins {
                    warn!(origin, "rejecting upgrade from disallowed origin");
                    return StatusCode::FORBIDDEN.into_response();
                }
                warn!(origin, "upgrade from origin not in allow-list");
            }
        }
    }

    let Ok(ws) = ws else {
        return ([(CONTENT_TYPE, "text/plain; charset=utf-8")], BANNER).into_response();
    };

    let params = params.map(|Query(p)| p).unwrap_or_default();
    let role = Role::from_client_type(params.client_type.as_deref());
    let id = ConnectionId::new();
    let registry = Arc::clone(&state.registry);
    let token = state.shutdown.token();
    let guard = state.shutdown.session_guard();
    let capacity = state.config.send_queue_capacity;

    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            run_session(socket, id, role, registry, token, capacity).await;
            drop(guard);
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(state.start_time, &state.registry))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(&state.metrics_handle),
    )
}
