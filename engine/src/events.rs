//! Change events and per-collection listener dispatch.

use crate::{CollectionName, Key, Record};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The kind of change a listener subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    Inserted,
    Updated,
    Deleted,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Inserted, Channel::Updated, Channel::Deleted];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Inserted => "INSERTED",
            Channel::Updated => "UPDATED",
            Channel::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of an insert or update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveEvent {
    pub db: String,
    pub collection: CollectionName,
    pub key: Key,
    pub key_path: String,
    pub record: Record,
}

/// Payload of a delete. Carries no record body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteEvent {
    pub db: String,
    pub collection: CollectionName,
    pub key: Key,
    pub key_path: String,
}

/// A change to one record.
#[derive(Debug, Clone, PartialEq)]
pub enum DbEvent {
    Inserted(SaveEvent),
    Updated(SaveEvent),
    Deleted(DeleteEvent),
}

impl DbEvent {
    pub fn channel(&self) -> Channel {
        match self {
            DbEvent::Inserted(_) => Channel::Inserted,
            DbEvent::Updated(_) => Channel::Updated,
            DbEvent::Deleted(_) => Channel::Deleted,
        }
    }

    pub fn db(&self) -> &str {
        match self {
            DbEvent::Inserted(e) | DbEvent::Updated(e) => &e.db,
            DbEvent::Deleted(e) => &e.db,
        }
    }

    pub fn collection(&self) -> &str {
        match self {
            DbEvent::Inserted(e) | DbEvent::Updated(e) => &e.collection,
            DbEvent::Deleted(e) => &e.collection,
        }
    }

    pub fn key(&self) -> &Key {
        match self {
            DbEvent::Inserted(e) | DbEvent::Updated(e) => &e.key,
            DbEvent::Deleted(e) => &e.key,
        }
    }

    pub fn record(&self) -> Option<&Record> {
        match self {
            DbEvent::Inserted(e) | DbEvent::Updated(e) => Some(&e.record),
            DbEvent::Deleted(_) => None,
        }
    }

    /// The event payload as sent over the wire, without the channel.
    pub fn to_params(&self) -> serde_json::Value {
        // Both payloads are plain structs of strings, keys and maps.
        let params = match self {
            DbEvent::Inserted(e) | DbEvent::Updated(e) => serde_json::to_value(e),
            DbEvent::Deleted(e) => serde_json::to_value(e),
        };
        params.unwrap_or(serde_json::Value::Null)
    }
}

/// Error type listeners may return.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// A registered callback.
pub type Listener = Arc<dyn Fn(&DbEvent) -> Result<(), ListenerError> + Send + Sync>;

/// Handle returned on registration, used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Listeners of one collection, grouped by channel.
///
/// Listeners run synchronously in registration order. A listener that returns
/// an error or panics is logged and skipped; the rest still run.
pub struct Dispatcher {
    collection: CollectionName,
    listeners: RwLock<HashMap<Channel, Vec<(ListenerId, Listener)>>>,
    next_id: AtomicU64,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.read();
        let counts: HashMap<_, _> = listeners.iter().map(|(c, l)| (*c, l.len())).collect();
        f.debug_struct("Dispatcher")
            .field("collection", &self.collection)
            .field("listeners", &counts)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(collection: impl Into<CollectionName>) -> Self {
        Self {
            collection: collection.into(),
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn add<F>(&self, channel: Channel, listener: F) -> ListenerId
    where
        F: Fn(&DbEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.add_shared(channel, Arc::new(listener))
    }

    /// Register an already shared listener.
    pub fn add_shared(&self, channel: Channel, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .entry(channel)
            .or_default()
            .push((id, listener));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let mut removed = false;
        for entries in listeners.values_mut() {
            let before = entries.len();
            entries.retain(|(existing, _)| *existing != id);
            removed |= entries.len() != before;
        }
        removed
    }

    pub fn listener_count(&self, channel: Channel) -> usize {
        self.listeners.read().get(&channel).map_or(0, Vec::len)
    }

    /// Run every listener on the event's channel. Returns how many succeeded.
    pub fn dispatch(&self, event: &DbEvent) -> usize {
        let channel = event.channel();
        // Snapshot so listeners can register or remove listeners themselves.
        let listeners: Vec<(ListenerId, Listener)> = self
            .listeners
            .read()
            .get(&channel)
            .cloned()
            .unwrap_or_default();

        let mut succeeded = 0;
        for (id, listener) in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => succeeded += 1,
                Ok(Err(e)) => tracing::warn!(
                    collection = %self.collection,
                    %channel,
                    listener = id.0,
                    error = %e,
                    "listener failed"
                ),
                Err(_) => tracing::error!(
                    collection = %self.collection,
                    %channel,
                    listener = id.0,
                    "listener panicked"
                ),
            }
        }
        succeeded
    }
}
