//! The replication server core.
//!
//! [`ReplicationServer`] maps each JSON-RPC method to a handler over the
//! [`DatabaseRegistry`]. It is independent of the socket: the WebSocket and
//! HTTP handlers, and tests, feed it requests tagged with the connection they
//! came from.

use std::sync::Arc;

use ripple_engine::protocol::{parse_params, schema_filter};
use ripple_engine::record::{key_of, UPDATED_AT};
use ripple_engine::{
    Comparison, DeleteEvent, Filter, Method, Origin, QueryParams, RpcError, RpcRequest,
    RpcResponse, SaveEvent, SyncParams,
};
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::error::{AppError, Result};
use crate::registry::DatabaseRegistry;
use crate::websocket::{ConnectionManager, MessageSender, ServerMessage};

/// Origin used for requests that arrive over plain HTTP.
///
/// It never names a registered connection, so writes reach every socket.
pub const HTTP_ORIGIN: &str = "http";

/// Connection lifecycle hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    Connected { id: String },
    Disconnected { id: String },
}

#[derive(Debug)]
pub struct ReplicationServer {
    registry: DatabaseRegistry,
    connections: Arc<ConnectionManager>,
    lifecycle: broadcast::Sender<Lifecycle>,
}

impl ReplicationServer {
    pub fn new(registry: DatabaseRegistry) -> Self {
        let (lifecycle, _) = broadcast::channel(64);
        Self {
            registry,
            connections: ConnectionManager::new_shared(),
            lifecycle,
        }
    }

    pub fn registry(&self) -> &DatabaseRegistry {
        &self.registry
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Observe connects and disconnects.
    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<Lifecycle> {
        self.lifecycle.subscribe()
    }

    /// Register a peer. Changes from other peers are pushed to `sender`.
    pub fn connect(&self, sender: MessageSender) -> String {
        let id = self.connections.register(sender);
        // No subscribers is fine.
        let _ = self.lifecycle.send(Lifecycle::Connected { id: id.clone() });
        id
    }

    pub fn disconnect(&self, conn_id: &str) {
        if self.connections.unregister(conn_id) {
            let _ = self.lifecycle.send(Lifecycle::Disconnected {
                id: conn_id.to_string(),
            });
        }
    }

    /// Handle a raw text frame. Unparseable input gets a parse error reply.
    pub async fn handle_text(&self, conn_id: &str, text: &str) -> Option<RpcResponse> {
        match serde_json::from_str::<RpcRequest>(text) {
            Ok(request) => self.handle(conn_id, request).await,
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, error = %e, "unparseable message");
                Some(RpcResponse::failure(
                    None,
                    RpcError::parse_error(format!("Parse error: {}", e)),
                ))
            }
        }
    }

    /// Dispatch one request from `conn_id`.
    ///
    /// Returns the reply, or `None` for a notification. A failure only fails
    /// this request.
    pub async fn handle(&self, conn_id: &str, request: RpcRequest) -> Option<RpcResponse> {
        let id = request.id.clone();
        let notification = request.is_notification();
        let method = request.method.clone();

        let result = self.dispatch(conn_id, request).await;
        if let Err(e) = &result {
            tracing::warn!(conn_id = %conn_id, %method, error = %e, "request failed");
        }
        if notification {
            return None;
        }
        Some(match result {
            Ok(value) => RpcResponse::success(id, value),
            Err(e) => RpcResponse::failure(id, RpcError::from(&e)),
        })
    }

    async fn dispatch(&self, conn_id: &str, request: RpcRequest) -> Result<Value> {
        let method = request.method()?;
        tracing::debug!(conn_id = %conn_id, %method, "dispatch");
        match method {
            Method::Schema => self.schema(&request.params),
            Method::Inserted | Method::Updated => self.save(conn_id, method, request.params).await,
            Method::Deleted => self.delete(conn_id, request.params).await,
            Method::Query => self.query(request.params).await,
            Method::Scalar => self.scalar(request.params).await,
            Method::Sync => self.sync(conn_id, request.params).await,
        }
    }

    fn schema(&self, params: &Value) -> Result<Value> {
        let schemas = self.registry.schemas(schema_filter(params).as_deref())?;
        Ok(serde_json::to_value(schemas)?)
    }

    /// Apply a peer's insert or update and pass it on to everyone else.
    ///
    /// A write older than the stored record is dropped and not rebroadcast.
    async fn save(&self, conn_id: &str, method: Method, params: Value) -> Result<Value> {
        let event: SaveEvent = parse_params(params)?;
        let db = self.registry.get(&event.db)?;
        let Some(stored) = db
            .merge(&event.collection, event.record, Origin::Remote)
            .await?
        else {
            return Ok(json!(false));
        };

        let message = ServerMessage::notification(method, serde_json::to_value(&stored)?);
        let recipients = self.connections.broadcast_except(conn_id, message);
        tracing::debug!(db = %stored.db, collection = %stored.collection, key = %stored.key, recipients, "applied write");
        Ok(json!(true))
    }

    async fn delete(&self, conn_id: &str, params: Value) -> Result<Value> {
        let event: DeleteEvent = parse_params(params)?;
        let db = self.registry.get(&event.db)?;
        let deleted = db
            .delete(&event.collection, &event.key, Origin::Remote)
            .await?;

        let message = ServerMessage::notification(Method::Deleted, serde_json::to_value(&deleted)?);
        let recipients = self.connections.broadcast_except(conn_id, message);
        tracing::debug!(db = %deleted.db, collection = %deleted.collection, key = %deleted.key, recipients, "applied delete");
        Ok(json!(true))
    }

    async fn query(&self, params: Value) -> Result<Value> {
        let params: QueryParams = parse_params(params)?;
        let db = self.registry.get(&params.db)?;
        let records = db
            .select(&params.collection)?
            .with_query(params.query)
            .all()
            .await?;
        Ok(serde_json::to_value(records)?)
    }

    async fn scalar(&self, params: Value) -> Result<Value> {
        let params: QueryParams = parse_params(params)?;
        let db = self.registry.get(&params.db)?;
        let record = db
            .select(&params.collection)?
            .with_query(params.query)
            .first()
            .await?;
        Ok(serde_json::to_value(record)?)
    }

    /// Push every record newer than `lastUpdatedAt` to the caller only, as
    /// `UPDATED` notifications. Replies with how many were pushed.
    async fn sync(&self, conn_id: &str, params: Value) -> Result<Value> {
        let params: SyncParams = parse_params(params)?;
        let db = self.registry.get(&params.db)?;
        let collection = db.schema().require_collection(&params.collection)?.clone();

        let mut select = db.select(&collection.name)?.order_by(UPDATED_AT, false);
        if let Some(mark) = params.last_updated_at {
            select = select.filter(Filter::term(UPDATED_AT, Comparison::Gt, mark));
        }

        let mut pushed = 0usize;
        for record in select.all().await? {
            let key = key_of(&record, &collection.key_path).ok_or_else(|| {
                AppError::Internal(format!(
                    "stored record in '{}' has no key",
                    collection.name
                ))
            })?;
            let event = SaveEvent {
                db: params.db.clone(),
                collection: collection.name.clone(),
                key,
                key_path: collection.key_path.clone(),
                record,
            };
            let message = ServerMessage::notification(Method::Updated, serde_json::to_value(&event)?);
            if self.connections.send_to(conn_id, message) {
                pushed += 1;
            }
        }

        tracing::debug!(conn_id = %conn_id, db = %params.db, collection = %collection.name, since = ?params.last_updated_at, pushed, "sync");
        Ok(json!(pushed))
    }
}
