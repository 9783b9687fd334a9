//! Wire protocol shared by replication clients and servers.
//!
//! Messages are JSON-RPC 2.0. A request without an id is a notification and
//! gets no response. Method names and parameter shapes are defined here;
//! how messages are framed and carried is up to the transport.

use crate::{error::Result, Channel, CollectionName, Error, Query, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub const JSONRPC_VERSION: &str = "2.0";

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
/// Application failure: unknown database or collection, storage errors.
pub const APPLICATION_ERROR: i64 = -32000;

/// Remote methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Fetch schemas
    Schema,
    Inserted,
    Updated,
    Deleted,
    /// Run a query and return all results
    Query,
    /// Run a query and return the first result
    Scalar,
    /// Push every record newer than a timestamp back as notifications
    Sync,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Schema => "SCHEMA",
            Method::Inserted => "INSERTED",
            Method::Updated => "UPDATED",
            Method::Deleted => "DELETED",
            Method::Query => "QUERY",
            Method::Scalar => "SCALAR",
            Method::Sync => "SYNC",
        }
    }

    /// The write method carrying events of `channel`.
    pub fn for_channel(channel: Channel) -> Method {
        match channel {
            Channel::Inserted => Method::Inserted,
            Channel::Updated => Method::Updated,
            Channel::Deleted => Method::Deleted,
        }
    }

    /// The event channel of a write method.
    pub fn channel(self) -> Option<Channel> {
        match self {
            Method::Inserted => Some(Channel::Inserted),
            Method::Updated => Some(Channel::Updated),
            Method::Deleted => Some(Channel::Deleted),
            _ => None,
        }
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SCHEMA" => Ok(Method::Schema),
            "INSERTED" | "ADD" => Ok(Method::Inserted),
            "UPDATED" | "PUT" => Ok(Method::Updated),
            "DELETED" | "DELETE" => Ok(Method::Deleted),
            "QUERY" => Ok(Method::Query),
            "SCALAR" => Ok(Method::Scalar),
            "SYNC" => Ok(Method::Sync),
            other => Err(Error::UnknownMethod(other.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request id: a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    Text(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::Text(s) => write!(f, "{}", s),
        }
    }
}

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// A call or, without an id, a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl RpcRequest {
    pub fn call(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: default_version(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: default_version(),
            id: None,
            method: method.into(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Resolve the method name, accepting the legacy write aliases.
    pub fn method(&self) -> Result<Method> {
        self.method.parse()
    }
}

/// Error object of a failed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(PARSE_ERROR, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for RpcError {}

impl From<&Error> for RpcError {
    fn from(e: &Error) -> Self {
        let code = match e {
            Error::UnknownMethod(_) => METHOD_NOT_FOUND,
            Error::InvalidParams(_)
            | Error::InvalidFilter(_)
            | Error::UnknownComparison(_)
            | Error::InvalidRecord(_)
            | Error::MissingKey { .. }
            | Error::Serialization(_) => INVALID_PARAMS,
            Error::CollectionNotFound(_) | Error::DuplicateKey { .. } | Error::Storage(_) => {
                APPLICATION_ERROR
            }
        };
        Self::new(code, e.to_string())
    }
}

/// Reply to a call. Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    /// `null` when the request id could not be read
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: default_version(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<RequestId>, error: RpcError) -> Self {
        Self {
            jsonrpc: default_version(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// The call outcome. A missing result reads as `null`.
    pub fn into_result(self) -> std::result::Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Any message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcMessage {
    Request(RpcRequest),
    Response(RpcResponse),
}

/// Params of `QUERY` and `SCALAR`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    pub db: String,
    pub collection: CollectionName,
    #[serde(flatten)]
    pub query: Query,
}

impl QueryParams {
    pub fn new(db: impl Into<String>, collection: impl Into<CollectionName>, query: Query) -> Self {
        Self {
            db: db.into(),
            collection: collection.into(),
            query,
        }
    }
}

/// Params of `SYNC`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncParams {
    pub db: String,
    pub collection: CollectionName,
    /// Only records with a strictly newer `updated_at` are sent; all when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<Timestamp>,
}

/// Database name a `SCHEMA` call is restricted to, if any.
///
/// Accepts no params, a bare string, or `{"db": name}`.
pub fn schema_filter(params: &Value) -> Option<String> {
    match params {
        Value::String(name) => Some(name.clone()),
        Value::Object(map) => map.get("db").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Decode method params, reporting failures as invalid params.
pub fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| Error::InvalidParams(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Comparison, DeleteEvent, Filter, Key, SaveEvent};
    use serde_json::json;

    #[test]
    fn method_names_and_aliases() {
        assert_eq!("SCHEMA".parse::<Method>().unwrap(), Method::Schema);
        assert_eq!("ADD".parse::<Method>().unwrap(), Method::Inserted);
        assert_eq!("PUT".parse::<Method>().unwrap(), Method::Updated);
        assert_eq!("DELETE".parse::<Method>().unwrap(), Method::Deleted);
        assert_eq!(Method::Sync.to_string(), "SYNC");
        assert!(matches!(
            "GET".parse::<Method>(),
            Err(Error::UnknownMethod(m)) if m == "GET"
        ));
        assert_eq!(Method::for_channel(Channel::Updated), Method::Updated);
        assert_eq!(Method::Deleted.channel(), Some(Channel::Deleted));
        assert_eq!(Method::Query.channel(), None);
    }

    #[test]
    fn request_serialization() {
        let call = RpcRequest::call(RequestId::Number(1), "QUERY", json!({"db": "app"}));
        assert_eq!(
            serde_json::to_value(&call).unwrap(),
            json!({"jsonrpc": "2.0", "id": 1, "method": "QUERY", "params": {"db": "app"}})
        );

        let note = RpcRequest::notification("UPDATED", Value::Null);
        assert!(note.is_notification());
        assert_eq!(
            serde_json::to_value(&note).unwrap(),
            json!({"jsonrpc": "2.0", "method": "UPDATED"})
        );
    }

    #[test]
    fn message_classification() {
        let msg: RpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"DELETED","params":{}}"#).unwrap();
        assert!(matches!(msg, RpcMessage::Request(r) if r.is_notification()));

        let msg: RpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"a1","result":[1,2]}"#).unwrap();
        match msg {
            RpcMessage::Response(resp) => {
                assert_eq!(resp.id, Some(RequestId::Text("a1".into())));
                assert_eq!(resp.into_result().unwrap(), json!([1, 2]));
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn response_outcomes() {
        let ok = RpcResponse::success(Some(RequestId::Number(3)), Value::Null);
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json, json!({"jsonrpc": "2.0", "id": 3, "result": null}));
        let parsed: RpcResponse = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.into_result().unwrap(), Value::Null);

        let err = RpcResponse::failure(None, RpcError::method_not_found("NOPE"));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["id"], Value::Null);
        assert_eq!(json["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(err.into_result().unwrap_err().message, "Method not found: NOPE");
    }

    #[test]
    fn engine_errors_map_to_codes() {
        let e = Error::CollectionNotFound("x".into());
        assert_eq!(RpcError::from(&e).code, APPLICATION_ERROR);
        let e = Error::UnknownComparison("X".into());
        assert_eq!(RpcError::from(&e).code, INVALID_PARAMS);
        let e = Error::UnknownMethod("X".into());
        assert_eq!(RpcError::from(&e).code, METHOD_NOT_FOUND);
    }

    #[test]
    fn query_params_flatten_query() {
        let params: QueryParams = parse_params(json!({
            "db": "app",
            "collection": "todos",
            "where": {"field": "updated_at", "comparison": "GT", "value": 10},
            "offset": 2
        }))
        .unwrap();
        assert_eq!(params.db, "app");
        assert_eq!(
            params.query.filter,
            Some(Filter::term("updated_at", Comparison::Gt, 10))
        );
        assert_eq!(params.query.offset, Some(2));

        let err = parse_params::<QueryParams>(json!({"db": "app"})).unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }

    #[test]
    fn sync_params() {
        let params: SyncParams = parse_params(json!({
            "db": "app", "collection": "todos", "lastUpdatedAt": 99
        }))
        .unwrap();
        assert_eq!(params.last_updated_at, Some(99));
        let params: SyncParams = parse_params(json!({"db": "app", "collection": "todos"})).unwrap();
        assert_eq!(params.last_updated_at, None);
    }

    #[test]
    fn schema_filter_shapes() {
        assert_eq!(schema_filter(&Value::Null), None);
        assert_eq!(schema_filter(&json!("app")), Some("app".into()));
        assert_eq!(schema_filter(&json!({"db": "app"})), Some("app".into()));
    }

    #[test]
    fn write_events_as_params() {
        let save: SaveEvent = parse_params(json!({
            "db": "app", "collection": "todos", "key": "k", "keyPath": "id",
            "record": {"id": "k"}
        }))
        .unwrap();
        assert_eq!(save.key, Key::from("k"));

        let delete: DeleteEvent = parse_params(json!({
            "db": "app", "collection": "todos", "key": 5, "keyPath": "id"
        }))
        .unwrap();
        assert_eq!(delete.key, Key::Int(5));
    }
}
