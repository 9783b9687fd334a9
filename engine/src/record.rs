//! Record types and the conventions the write path relies on.
//!
//! A record is an untyped JSON object. Two fields are owned by the store
//! rather than the caller: [`CREATED_AT`] and [`UPDATED_AT`], both integer
//! milliseconds since the Unix epoch. `updated_at` is the high-water mark
//! used for incremental sync.

use crate::{error::Result, Error, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A data record: a JSON object keyed by field name.
pub type Record = serde_json::Map<String, Value>;

/// Field stamped on insert.
pub const CREATED_AT: &str = "created_at";

/// Field stamped on every write.
pub const UPDATED_AT: &str = "updated_at";

/// Where a write came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Created or modified locally. Timestamps are stamped and listeners notified.
    Local,
    /// Received from a peer. Incoming timestamps are kept and listeners are
    /// not notified, so the change is not echoed back.
    Remote,
}

impl Origin {
    /// Whether writes with this origin notify listeners.
    pub fn notifies(self) -> bool {
        matches!(self, Origin::Local)
    }
}

/// The value identifying a record within its collection.
///
/// Integer keys sort before text keys, which keeps auto-increment
/// collections in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Int(i64),
    Text(String),
}

impl Key {
    /// Extract a key from a JSON value. Only integers and strings qualify.
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Number(n) => n.as_i64().map(Key::Int),
            Value::String(s) => Some(Key::Text(s.clone())),
            _ => None,
        }
    }

    /// Convert the key back into a JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Int(i) => Value::from(*i),
            Key::Text(s) => Value::from(s.clone()),
        }
    }

    /// Generate a fresh text key.
    ///
    /// UUID v4, so two nodes generating keys offline will not collide.
    pub fn generate() -> Key {
        Key::Text(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{}", i),
            Key::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Int(i)
    }
}

/// Turn an arbitrary JSON value into a record, rejecting non-objects.
pub fn into_record(value: Value) -> Result<Record> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::InvalidRecord(format!(
            "expected an object, got {}",
            type_name(&other)
        ))),
    }
}

/// Read the key of a record at `key_path`.
pub fn key_of(record: &Record, key_path: &str) -> Option<Key> {
    record.get(key_path).and_then(Key::from_value)
}

/// Read a timestamp field, if present and numeric.
pub fn timestamp_of(record: &Record, field: &str) -> Option<Timestamp> {
    record.get(field).and_then(Value::as_u64)
}

/// Read the `updated_at` timestamp of a record.
pub fn updated_at(record: &Record) -> Option<Timestamp> {
    timestamp_of(record, UPDATED_AT)
}

/// Stamp both timestamps for a fresh local insert.
pub fn stamp_created(record: &mut Record, now: Timestamp) {
    record.insert(CREATED_AT.to_string(), Value::from(now));
    record.insert(UPDATED_AT.to_string(), Value::from(now));
}

/// Stamp `updated_at` for a local modification.
pub fn stamp_updated(record: &mut Record, now: Timestamp) {
    record.insert(UPDATED_AT.to_string(), Value::from(now));
}

/// Fill in any missing timestamps without touching existing ones.
pub fn stamp_missing(record: &mut Record, now: Timestamp) {
    if timestamp_of(record, CREATED_AT).is_none() {
        record.insert(CREATED_AT.to_string(), Value::from(now));
    }
    if timestamp_of(record, UPDATED_AT).is_none() {
        record.insert(UPDATED_AT.to_string(), Value::from(now));
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        into_record(value).unwrap()
    }

    #[test]
    fn key_from_value() {
        assert_eq!(Key::from_value(&json!(5)), Some(Key::Int(5)));
        assert_eq!(Key::from_value(&json!("a")), Some(Key::Text("a".into())));
        assert_eq!(Key::from_value(&json!(1.5)), None);
        assert_eq!(Key::from_value(&json!(null)), None);
        assert_eq!(Key::from_value(&json!({"id": 1})), None);
    }

    #[test]
    fn key_ordering_puts_ints_first() {
        let mut keys = vec![Key::from("b"), Key::Int(2), Key::from("a"), Key::Int(1)];
        keys.sort();
        assert_eq!(
            keys,
            vec![Key::Int(1), Key::Int(2), Key::from("a"), Key::from("b")]
        );
    }

    #[test]
    fn key_serializes_untagged() {
        assert_eq!(serde_json::to_string(&Key::Int(3)).unwrap(), "3");
        assert_eq!(serde_json::to_string(&Key::from("x")).unwrap(), "\"x\"");
        let parsed: Key = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(parsed, Key::from("abc"));
    }

    #[test]
    fn generated_keys_are_unique() {
        let a = Key::generate();
        let b = Key::generate();
        assert_ne!(a, b);
        assert!(matches!(a, Key::Text(ref s) if s.len() == 36));
    }

    #[test]
    fn into_record_rejects_non_objects() {
        assert!(into_record(json!({"a": 1})).is_ok());
        let err = into_record(json!([1, 2])).unwrap_err();
        assert!(matches!(err, Error::InvalidRecord(msg) if msg.contains("array")));
    }

    #[test]
    fn stamping() {
        let mut rec = record(json!({"id": "x"}));
        stamp_created(&mut rec, 100);
        assert_eq!(timestamp_of(&rec, CREATED_AT), Some(100));
        assert_eq!(updated_at(&rec), Some(100));

        stamp_updated(&mut rec, 200);
        assert_eq!(timestamp_of(&rec, CREATED_AT), Some(100));
        assert_eq!(updated_at(&rec), Some(200));
    }

    #[test]
    fn stamp_missing_keeps_existing() {
        let mut rec = record(json!({"id": "x", "updated_at": 50}));
        stamp_missing(&mut rec, 900);
        assert_eq!(timestamp_of(&rec, CREATED_AT), Some(900));
        assert_eq!(updated_at(&rec), Some(50));
    }

    #[test]
    fn origin_notifies() {
        assert!(Origin::Local.notifies());
        assert!(!Origin::Remote.notifies());
    }
}
