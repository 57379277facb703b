//! Token checks for the HTTP and WebSocket surfaces
//!
//! Both surfaces gate on a shared secret compared by plain equality: the
//! HTTP routes read the `Authorization` header, the WebSocket handshake
//! carries its token in the upgrade request. Auth runs before any device
//! I/O.

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::AppState;

/// Middleware guarding the HTTP query routes.
pub async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    match header {
        None => (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
        Some(token) if token != state.config.http_token => {
            (StatusCode::UNAUTHORIZED, "invalid token").into_response()
        }
        Some(_) => next.run(request).await,
    }
}

/// Whether a WebSocket handshake carried the right secret.
pub fn handshake_authorized(state: &AppState, token: Option<&str>) -> bool {
    token == Some(state.config.stream_token.as_str())
}
