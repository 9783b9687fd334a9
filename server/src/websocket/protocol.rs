//! WebSocket message protocol definitions.
//!
//! Clients send JSON-RPC 2.0 requests as text frames. The server replies with
//! responses and pushes changes as JSON-RPC notifications.

use ripple_engine::{Method, RequestId, RpcError, RpcRequest, RpcResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// A pushed change; carries no id.
    Notification(RpcRequest),

    /// Reply to a client call.
    Response(RpcResponse),
}

impl ServerMessage {
    /// Create a notification for `method`.
    pub fn notification(method: Method, params: Value) -> Self {
        ServerMessage::Notification(RpcRequest::notification(method.as_str(), params))
    }

    /// Create an error reply.
    pub fn error(id: Option<RequestId>, error: RpcError) -> Self {
        ServerMessage::Response(RpcResponse::failure(id, error))
    }

    /// The notification method, if this is a notification.
    pub fn method(&self) -> Option<&str> {
        match self {
            ServerMessage::Notification(request) => Some(&request.method),
            ServerMessage::Response(_) => None,
        }
    }
}

impl From<RpcResponse> for ServerMessage {
    fn from(response: RpcResponse) -> Self {
        ServerMessage::Response(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_serialization() {
        let msg = ServerMessage::notification(Method::Deleted, json!({"db": "app", "key": 1}));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            json!({"jsonrpc": "2.0", "method": "DELETED", "params": {"db": "app", "key": 1}})
        );
        assert_eq!(msg.method(), Some("DELETED"));
    }

    #[test]
    fn test_error_serialization() {
        let msg = ServerMessage::error(
            Some(RequestId::Number(7)),
            RpcError::method_not_found("FOO"),
        );
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""id":7"#));
        assert!(json.contains(r#""code":-32601"#));
        assert!(json.contains(r#""message":"Method not found: FOO""#));
    }

    #[test]
    fn test_round_trip_distinguishes_kinds() {
        let response: ServerMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"a","result":[1]}"#).unwrap();
        assert!(matches!(response, ServerMessage::Response(_)));

        let notification: ServerMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"UPDATED","params":{}}"#).unwrap();
        assert_eq!(notification.method(), Some("UPDATED"));
    }
}
