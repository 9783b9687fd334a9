//! Outbound sync queue.
//!
//! Every outgoing write is persisted before it is sent and removed only after
//! the peer acknowledged it. Entries left behind by a failed send are resent
//! by [`Outbox::flush`] when the transport reconnects, giving at-least-once
//! delivery.

use crate::error::Result;
use crate::transport::Transport;
use futures::future::join_all;
use ripple_engine::record::into_record;
use ripple_engine::{
    CollectionSchema, Key, ObservableStore, Origin, Record, Schema, Storage,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Schema name of the client metadata store.
pub const OUTBOX_SCHEMA: &str = "messagedb";

/// Collection holding queued messages.
pub const OUTBOX_COLLECTION: &str = "message";

/// A queued remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Local id, assigned in enqueue order
    pub id: i64,
    pub action: String,
    #[serde(default)]
    pub params: Value,
}

impl OutboxEntry {
    fn from_record(record: Record) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(record))?)
    }
}

/// Outcome of a [`Outbox::flush`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Durable queue of pending remote calls.
pub struct Outbox {
    store: ObservableStore,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox").field("store", &self.store).finish()
    }
}

impl Outbox {
    /// Schema of the metadata store the queue lives in.
    pub fn schema() -> Schema {
        Schema::new(OUTBOX_SCHEMA, 1)
            .with_collection(CollectionSchema::new(OUTBOX_COLLECTION, "id").auto_increment())
    }

    /// Open the queue on `storage`, keeping anything already queued there.
    pub async fn open(storage: Arc<dyn Storage>, transport: Arc<dyn Transport>) -> Result<Self> {
        let store = ObservableStore::open(Self::schema(), storage).await?;
        Ok(Self { store, transport })
    }

    /// Persist a call without sending it.
    pub async fn enqueue(&self, action: &str, params: Value) -> Result<OutboxEntry> {
        let record = into_record(json!({"action": action, "params": params}))?;
        let event = self
            .store
            .insert(OUTBOX_COLLECTION, record, Origin::Local)
            .await?;
        tracing::debug!(id = %event.key, %action, "queued message");
        OutboxEntry::from_record(event.record)
    }

    /// Send a queued entry and drop it once the peer acknowledged it.
    ///
    /// On failure the entry stays queued for the next flush.
    pub async fn send(&self, entry: &OutboxEntry) -> Result<Value> {
        match self.transport.call(&entry.action, entry.params.clone()).await {
            Ok(result) => {
                self.store
                    .delete(OUTBOX_COLLECTION, &Key::Int(entry.id), Origin::Local)
                    .await?;
                tracing::debug!(id = entry.id, action = %entry.action, "delivered message");
                Ok(result)
            }
            Err(e) => {
                tracing::debug!(id = entry.id, action = %entry.action, error = %e, "message kept for retry");
                Err(e.into())
            }
        }
    }

    /// Queue a call, then send it.
    pub async fn enqueue_and_send(&self, action: &str, params: Value) -> Result<Value> {
        let entry = self.enqueue(action, params).await?;
        self.send(&entry).await
    }

    /// Resend everything queued, in enqueue order.
    ///
    /// Entries are sent concurrently and independently: one failing does not
    /// hold back the others.
    pub async fn flush(&self) -> Result<FlushReport> {
        let pending = self.pending().await?;
        if pending.is_empty() {
            return Ok(FlushReport::default());
        }

        let results = join_all(pending.iter().map(|entry| self.send(entry))).await;
        let mut report = FlushReport::default();
        for result in results {
            match result {
                Ok(_) => report.delivered += 1,
                Err(e) if e.is_disconnected() => report.failed += 1,
                Err(e) => {
                    // The peer received and rejected it; resending will not help.
                    report.failed += 1;
                    tracing::warn!(error = %e, "queued message rejected by peer");
                }
            }
        }
        tracing::info!(
            delivered = report.delivered,
            failed = report.failed,
            "flushed outbox"
        );
        Ok(report)
    }

    /// Entries waiting for acknowledgement, oldest first.
    pub async fn pending(&self) -> Result<Vec<OutboxEntry>> {
        self.store
            .select(OUTBOX_COLLECTION)?
            .order_by("id", false)
            .all()
            .await?
            .into_iter()
            .map(OutboxEntry::from_record)
            .collect()
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.store.select(OUTBOX_COLLECTION)?.count().await?)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// The metadata storage, shared with the schema cache.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        self.store.storage()
    }
}
