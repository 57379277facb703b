//! HTTP + WebSocket server
//!
//! Wires the token-gated query routes and the real-time channel onto one
//! axum router. The query routes sit behind the `Authorization` middleware;
//! `/ws` authenticates its own handshake. CORS is permissive, matching the
//! deployments this serves (browser dashboards on other origins).

pub mod auth;
pub mod http;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::device::DeviceConnector;
use crate::relay::SessionManager;

/// Shared state accessible from every handler
#[derive(Clone)]
pub struct AppState {
    /// Session/subscription manager for the real-time channel
    pub manager: Arc<SessionManager>,
    /// Connector used by the short-lived query handlers
    pub connector: Arc<dyn DeviceConnector>,
    /// Runtime configuration
    pub config: Arc<Config>,
}

/// Build the router with all routes and layers.
pub fn router(state: AppState) -> Router {
    let queries = Router::new()
        .route("/interfaces", get(http::list_interfaces))
        .route("/resources", get(http::system_resources))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ));

    Router::new()
        .merge(queries)
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "listening");
    axum::serve(listener, router(state)).await
}
