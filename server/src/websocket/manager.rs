//! WebSocket connection manager.
//!
//! Tracks active connections and routes pushed changes to them: broadcast to
//! every peer except the writer, or unicast to one connection.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;

use super::ServerMessage;

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// A single WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: String,
    pub connected_at: DateTime<Utc>,
    /// Channel to send messages to this connection
    pub sender: MessageSender,
}

/// Manages active WebSocket connections.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: DashMap<String, Connection>,
}

impl ConnectionManager {
    /// Create a new connection manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new connection manager wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection.
    ///
    /// Returns the connection ID.
    pub fn register(&self, sender: MessageSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();

        let connection = Connection {
            id: conn_id.clone(),
            connected_at: Utc::now(),
            sender,
        };
        self.connections.insert(conn_id.clone(), connection);

        tracing::info!(conn_id = %conn_id, "connection registered");

        conn_id
    }

    /// Unregister a connection. Returns false if it was not registered.
    pub fn unregister(&self, conn_id: &str) -> bool {
        match self.connections.remove(conn_id) {
            Some((_, conn)) => {
                let seconds = (Utc::now() - conn.connected_at).num_seconds();
                tracing::info!(conn_id = %conn_id, seconds, "connection unregistered");
                true
            }
            None => false,
        }
    }

    /// Broadcast a message to all connections except the sender.
    ///
    /// Returns the number of connections that received the message.
    pub fn broadcast_except(&self, sender_conn_id: &str, message: ServerMessage) -> usize {
        let mut sent_count = 0;

        for entry in self.connections.iter() {
            let conn = entry.value();
            if conn.id != sender_conn_id && conn.sender.send(message.clone()).is_ok() {
                sent_count += 1;
            }
        }

        tracing::debug!(
            sender = %sender_conn_id,
            recipients = sent_count,
            method = message.method().unwrap_or_default(),
            "broadcast message"
        );

        sent_count
    }

    /// Send a message to a specific connection.
    pub fn send_to(&self, conn_id: &str, message: ServerMessage) -> bool {
        match self.connections.get(conn_id) {
            Some(conn) => conn.sender.send(message).is_ok(),
            None => false,
        }
    }

    pub fn contains(&self, conn_id: &str) -> bool {
        self.connections.contains_key(conn_id)
    }

    /// Get the number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_engine::Method;
    use serde_json::json;

    #[test]
    fn test_register_unregister() {
        let manager = ConnectionManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let conn_id = manager.register(tx);
        assert_eq!(manager.connection_count(), 1);
        assert!(manager.contains(&conn_id));

        assert!(manager.unregister(&conn_id));
        assert_eq!(manager.connection_count(), 0);
        assert!(!manager.unregister(&conn_id));
    }

    #[test]
    fn test_broadcast_except() {
        let manager = ConnectionManager::new();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        let conn1 = manager.register(tx1);
        let _conn2 = manager.register(tx2);

        // Broadcast from conn1 should only reach conn2
        let message = ServerMessage::notification(Method::Updated, json!({"db": "app"}));
        let sent = manager.broadcast_except(&conn1, message.clone());
        assert_eq!(sent, 1);

        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap(), message);
    }

    #[test]
    fn test_send_to() {
        let manager = ConnectionManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = manager.register(tx);

        let message = ServerMessage::notification(Method::Inserted, json!({}));
        assert!(manager.send_to(&conn, message.clone()));
        assert!(!manager.send_to("unknown", message.clone()));
        assert_eq!(rx.try_recv().unwrap(), message);
    }

    #[test]
    fn test_closed_receiver_not_counted() {
        let manager = ConnectionManager::new();
        let (tx, rx) = mpsc::unbounded_channel();
        manager.register(tx);
        drop(rx);

        let sent = manager.broadcast_except("http", ServerMessage::notification(Method::Deleted, json!({})));
        assert_eq!(sent, 0);
    }
}
