//! WebSocket handler for live replication.
//!
//! Handles WebSocket connections and feeds every text frame to the
//! [`ReplicationServer`], while forwarding pushed changes to the socket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::server::ReplicationServer;
use crate::websocket::ServerMessage;
use crate::AppState;

/// GET /ws - Upgrade to a replication socket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_websocket_connection(socket, state.server))
}

/// Handle an established WebSocket connection.
///
/// This function:
/// 1. Registers the connection with the server
/// 2. Spawns a task to forward outgoing messages
/// 3. Processes incoming requests in order
/// 4. Cleans up on disconnect
pub async fn handle_websocket_connection(socket: WebSocket, server: Arc<ReplicationServer>) {
    // Split the socket into sender and receiver
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Create channel for sending messages to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let conn_id = server.connect(tx);

    tracing::info!(conn_id = %conn_id, "WebSocket client connected");

    // Spawn task to forward messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    // Process incoming messages
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if let Some(response) = server.handle_text(&conn_id, text.as_str()).await {
                    server
                        .connections()
                        .send_to(&conn_id, ServerMessage::Response(response));
                }
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
            }
            Ok(Message::Ping(data)) => {
                tracing::trace!("Received ping: {} bytes", data.len());
            }
            Ok(Message::Pong(_)) => {
                tracing::trace!("Received pong");
            }
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    // Clean up
    server.disconnect(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        active_connections = server.connections().connection_count(),
        "WebSocket client disconnected"
    );
}
