//! WebSocket channel
//!
//! Handles one client from upgrade through disconnect: authenticates the
//! handshake, registers the session, dispatches `traffic-room` requests to
//! the manager and forwards broadcast samples back as `traffic` messages.
//! There is no explicit stop message; closing the socket is the teardown
//! trigger.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::device::TrafficSample;

use super::auth;
use super::AppState;

/// Outbound sample buffer per connection; a client this far behind starts
/// missing samples rather than stalling the broadcast
const OUTBOUND_CAPACITY: usize = 64;

/// Messages a client may send
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Request to begin streaming an interface's counters
    #[serde(rename = "traffic-room")]
    TrafficRoom {
        host: String,
        #[serde(rename = "mikrotikInterface")]
        mikrotik_interface: String,
    },
}

/// Messages sent to clients
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// One traffic sample
    #[serde(rename = "traffic")]
    Traffic { rx: u64, tx: u64 },
}

impl From<TrafficSample> for ServerMessage {
    fn from(sample: TrafficSample) -> Self {
        ServerMessage::Traffic {
            rx: sample.rx_bps,
            tx: sample.tx_bps,
        }
    }
}

/// Handshake query parameters
#[derive(Debug, Deserialize)]
pub struct HandshakeParams {
    pub token: Option<String>,
}

/// `GET /ws`: authenticate the handshake, then upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HandshakeParams>,
    State(state): State<AppState>,
) -> Response {
    if !auth::handshake_authorized(&state, params.token.as_deref()) {
        tracing::info!("websocket handshake unauthorized");
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }
    ws.on_upgrade(move |socket| run_session(socket, state))
}

async fn run_session(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (sample_tx, mut sample_rx) = mpsc::channel::<TrafficSample>(OUTBOUND_CAPACITY);
    let id = state.manager.register(sample_tx).await;

    let outbound = tokio::spawn(async move {
        while let Some(sample) = sample_rx.recv().await {
            let message = ServerMessage::from(sample);
            let Ok(json) = serde_json::to_string(&message) else {
                continue;
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = ws_rx.next().await {
        let text = match message {
            Message::Text(text) => text.to_string(),
            // some clients send JSON in binary frames
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => text.to_owned(),
                Err(_) => {
                    tracing::debug!(session = %id, len = data.len(), "ignoring non-UTF8 frame");
                    continue;
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::TrafficRoom {
                host,
                mikrotik_interface,
            }) => {
                if let Err(error) = state
                    .manager
                    .start_streaming(id, &host, &mikrotik_interface)
                    .await
                {
                    tracing::warn!(
                        session = %id,
                        host,
                        interface = mikrotik_interface,
                        error = %error,
                        "start streaming failed"
                    );
                }
            }
            Err(error) => {
                tracing::debug!(session = %id, error = %error, "ignoring malformed message");
            }
        }
    }

    state.manager.disconnect(id).await;
    outbound.abort();
    tracing::info!(session = %id, "websocket closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_traffic_room() {
        let parsed: ClientMessage = serde_json::from_str(
            r#"{"type":"traffic-room","host":"10.0.0.1","mikrotikInterface":"ether1"}"#,
        )
        .unwrap();

        assert_eq!(
            parsed,
            ClientMessage::TrafficRoom {
                host: "10.0.0.1".into(),
                mikrotik_interface: "ether1".into(),
            }
        );
    }

    #[test]
    fn test_reject_unknown_message_type() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"type":"other-room","host":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_traffic_message_wire_format() {
        let message = ServerMessage::from(TrafficSample {
            rx_bps: 1000,
            tx_bps: 500,
        });
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["type"], "traffic");
        assert_eq!(json["rx"], 1000);
        assert_eq!(json["tx"], 500);
    }
}
