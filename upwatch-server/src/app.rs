use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::errors::{AppError, AppResult};
use crate::websocket::{self, ConnectionRegistry, WSMessage};

/// Fixed, deterministic bind candidate list: `8887`, then 49 ports in the
/// `49000..=51200` band.
pub fn candidate_ports() -> Vec<u16> {
    let mut ports = vec![8887];
    ports.extend(49_000..49_049);
    ports
}

#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub debug_mode: bool,
}

pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(websocket_handler));

    if state.debug_mode {
        router = router.route("/test/broadcast", post(test_broadcast_handler));
        warn!("debug mode enabled: /test/broadcast is reachable by any local process");
    }

    router
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Binds the first available port in [`candidate_ports`] on loopback only.
/// An `address in use` error moves to the next candidate; any other bind
/// error is fatal, matching the propagation policy in the error handling
/// design.
pub async fn bind_first_available(ports: &[u16]) -> anyhow::Result<TcpListener> {
    for &port in ports {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                info!(port, "bound listener");
                return Ok(listener);
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }

    anyhow::bail!(
        "failed to bind to any of {} candidate ports; all were in use or otherwise unavailable",
        ports.len()
    )
}

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Local::now().to_rfc3339(),
    }))
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| websocket::handshake::handle(socket, state.registry.clone()))
}

async fn test_broadcast_handler(
    State(state): State<AppState>,
    body: String,
) -> AppResult<StatusCode> {
    let message: WSMessage = serde_json::from_str(&body).map_err(AppError::from)?;
    websocket::broadcast(&state.registry, &message).await;
    Ok(StatusCode::OK)
}
