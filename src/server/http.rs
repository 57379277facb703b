//! HTTP query handlers
//!
//! Each handler opens a short-lived device connection, runs exactly one
//! read-only command and closes the connection no matter how the command
//! went. Connectivity failures and query failures both map to 500, with
//! distinct messages.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::error::DeviceError;

use super::AppState;

/// Interface types hidden from the listing (tunnel/VPN server bindings)
const EXCLUDED_KINDS: [&str; 3] = ["pppoe-in", "l2tp-in", "sstp-out"];

/// Request body naming the target device
#[derive(Debug, Deserialize)]
pub struct HostQuery {
    pub host: String,
}

/// `GET /interfaces`: list the device's interfaces, tunnels excluded.
pub async fn list_interfaces(
    State(state): State<AppState>,
    Json(query): Json<HostQuery>,
) -> Response {
    let mut device = match state.connector.connect(&query.host).await {
        Ok(device) => device,
        Err(error) => return failure(&query.host, error),
    };

    let result = device.list_interfaces().await;
    device.close().await;

    match result {
        Ok(interfaces) => {
            let visible: Vec<_> = interfaces
                .into_iter()
                .filter(|iface| !EXCLUDED_KINDS.contains(&iface.kind.as_str()))
                .collect();
            Json(visible).into_response()
        }
        Err(error) => failure(&query.host, error),
    }
}

/// `GET /resources`: the device's current system-resource snapshot.
pub async fn system_resources(
    State(state): State<AppState>,
    Json(query): Json<HostQuery>,
) -> Response {
    let mut device = match state.connector.connect(&query.host).await {
        Ok(device) => device,
        Err(error) => return failure(&query.host, error),
    };

    let result = device.system_resources().await;
    device.close().await;

    match result {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(error) => failure(&query.host, error),
    }
}

fn failure(host: &str, error: DeviceError) -> Response {
    if error.is_connectivity() {
        tracing::warn!(host, error = %error, "device connection failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "could not connect to device",
        )
            .into_response()
    } else {
        tracing::warn!(host, error = %error, "device query failed");
        (StatusCode::INTERNAL_SERVER_ERROR, "device query failed").into_response()
    }
}
