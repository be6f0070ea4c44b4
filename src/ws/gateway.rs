use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::relay::RelayHandle;
use super::sessions::{ConnectionId, Identity};
use crate::models::{ErrorResponse, ReceivedMessage, SendMessage};
use crate::services::auth_service::{resolve_identity, HandshakeQuery};
use crate::utils::scope_guard::ScopeGuard;
use crate::AppState;

/// WebSocket handler
///
/// The identity is settled before the upgrade; a connection without one
/// is refused and never reaches the relay.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HandshakeQuery>,
) -> Response {
    let identity = match resolve_identity(&headers, &query, state.config.cloud_auth_jwt_secret.as_deref()) {
        Ok(identity) => identity,
        Err(e) => {
            warn!("Rejected WebSocket handshake: {}", e);
            let status = StatusCode::UNAUTHORIZED;
            return (status, Json(ErrorResponse::new(status, e.to_string()))).into_response();
        }
    };

    info!("New WebSocket connection attempt from {}", identity.user_id);
    let capacity = state.config.outbound_queue_capacity.max(1);
    ws.on_upgrade(move |socket| handle_socket(socket, identity, state.relay, capacity))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, identity: Identity, relay: RelayHandle, capacity: usize) {
    let conn = ConnectionId::next();
    let (outbox, mut outbound) = mpsc::channel::<SendMessage>(capacity);

    if let Err(e) = relay.connect(conn, identity, outbox).await {
        error!("Cannot register connection {}: {}", conn, e);
        return;
    }

    // Whatever way this function ends, the relay must hear about it.
    let _disconnect = {
        let relay = relay.clone();
        ScopeGuard::new(move || {
            if let Err(e) = relay.disconnect(conn) {
                debug!("Disconnect of {} not delivered: {}", conn, e);
            }
        })
    };

    let (mut sender, mut receiver) = socket.split();

    // Relay -> client. Ends when the relay drops the session (eviction or
    // shutdown) or the socket refuses writes.
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize outbound message for {}: {}", conn, e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    // Client -> relay. Only text frames carry messages; anything that does
    // not parse as one of the known shapes is dropped.
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!("WebSocket error on {}: {}", conn, e);
                    break;
                }
            };
            match serde_json::from_str::<ReceivedMessage>(&text) {
                Ok(message) => {
                    if relay.message(conn, message).await.is_err() {
                        break;
                    }
                }
                Err(e) => debug!("Ignoring malformed message from {}: {}", conn, e),
            }
        }
    });

    // Wait for either task to finish (and finish the other)
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };
    info!("WebSocket connection {} terminated", conn);
}
