//! Replication client.
//!
//! Keeps one local [`ObservableStore`] per replicated database in step with a
//! replication server:
//! - local writes are forwarded through the [`Outbox`] as `INSERTED`,
//!   `UPDATED` and `DELETED` calls;
//! - on every (re)connect the outbox is flushed, the schemas are fetched again
//!   and each collection pulls what changed since its high-water mark;
//! - changes pushed by the server are applied with [`Origin::Remote`], so they
//!   are never sent back out.

use crate::error::{Error, Result, TransportError};
use crate::outbox::{Outbox, OutboxEntry};
use crate::transport::{Transport, TransportEvent};
use parking_lot::Mutex;
use parking_lot::RwLock;
use ripple_engine::protocol::parse_params;
use ripple_engine::record::UPDATED_AT;
use ripple_engine::{
    Channel, Comparison, DbEvent, DeleteEvent, Filter, ListenerError, Method, ObservableStore,
    Origin, Query, QueryParams, Record, SaveEvent, Schema, Storage, StorageProvider, SyncParams,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Metadata key the fetched schemas are cached under.
pub const SCHEMA_CACHE_KEY: &str = "schemas";

/// Where the client is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No schema known yet.
    Uninitialized,
    /// A `SCHEMA` call is in flight.
    SchemaRequested,
    /// Local stores exist and accept writes.
    Ready,
}

/// How a collection catches up after a connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullStrategy {
    /// `QUERY` for newer records and apply the result.
    #[default]
    Query,
    /// `SYNC`; the server pushes newer records as `UPDATED` notifications.
    Sync,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub pull: PullStrategy,
    /// Name of the local storage holding the outbox and the schema cache.
    pub meta_store: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            pull: PullStrategy::default(),
            meta_store: crate::outbox::OUTBOX_SCHEMA.to_string(),
        }
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pull(mut self, pull: PullStrategy) -> Self {
        self.pull = pull;
        self
    }

    pub fn meta_store(mut self, name: impl Into<String>) -> Self {
        self.meta_store = name.into();
        self
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    provider: Arc<dyn StorageProvider>,
    options: ClientOptions,
    meta: Arc<dyn Storage>,
    outbox: Outbox,
    databases: RwLock<HashMap<String, Arc<ObservableStore>>>,
    state: watch::Sender<ClientState>,
    local_tx: mpsc::UnboundedSender<DbEvent>,
    local_rx: Mutex<Option<mpsc::UnboundedReceiver<DbEvent>>>,
}

/// Client side of the replication protocol. Cheap to clone.
#[derive(Clone)]
pub struct ReplicationClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ReplicationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationClient")
            .field("state", &self.state())
            .field("databases", &self.databases())
            .finish()
    }
}

/// Background tasks of a started client. Dropping it stops them.
#[derive(Debug)]
pub struct ClientHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl ClientHandle {
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl ReplicationClient {
    /// Open the local metadata storage and restore stores from the schema cache.
    ///
    /// With a cached schema the client is `Ready` without any network call.
    pub async fn new(
        transport: Arc<dyn Transport>,
        provider: Arc<dyn StorageProvider>,
        options: ClientOptions,
    ) -> Result<Self> {
        let meta = provider.open(&options.meta_store).await?;
        let outbox = Outbox::open(meta.clone(), transport.clone()).await?;
        let (local_tx, local_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ClientState::Uninitialized);

        let inner = Arc::new(Inner {
            transport,
            provider,
            options,
            meta,
            outbox,
            databases: RwLock::new(HashMap::new()),
            state,
            local_tx,
            local_rx: Mutex::new(Some(local_rx)),
        });

        if let Some(schemas) = inner.cached_schemas().await? {
            tracing::info!(count = schemas.len(), "restoring stores from cached schema");
            inner.install(schemas).await?;
            inner.state.send_replace(ClientState::Ready);
        }

        Ok(Self { inner })
    }

    /// Spawn the transport event loop and the local write forwarder.
    pub fn start(&self) -> Result<ClientHandle> {
        let local_rx = self.inner.local_rx.lock().take().ok_or(Error::AlreadyStarted)?;
        let events = self.inner.transport.subscribe();

        let forwarder = tokio::spawn(forward_local(self.inner.clone(), local_rx));
        let event_loop = tokio::spawn(run_events(self.inner.clone(), events));
        Ok(ClientHandle {
            tasks: vec![forwarder, event_loop],
        })
    }

    pub fn state(&self) -> ClientState {
        *self.inner.state.borrow()
    }

    /// Resolve once the client is `Ready`.
    pub async fn wait_until_ready(&self) -> Result<()> {
        let mut state = self.inner.state.subscribe();
        state
            .wait_for(|s| *s == ClientState::Ready)
            .await
            .map(|_| ())
            .map_err(|_| TransportError::Closed.into())
    }

    /// The local store for a replicated database.
    pub fn database(&self, name: &str) -> Option<Arc<ObservableStore>> {
        self.inner.database(name)
    }

    /// Names of the replicated databases, sorted.
    pub fn databases(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.databases.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn outbox(&self) -> &Outbox {
        &self.inner.outbox
    }

    /// Run a query on the server. Not queued: fails while disconnected.
    pub async fn query(&self, params: QueryParams) -> Result<Vec<Record>> {
        let value = self
            .inner
            .transport
            .call(Method::Query.as_str(), serde_json::to_value(&params)?)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// First record of a query on the server. Not queued.
    pub async fn scalar(&self, params: QueryParams) -> Result<Option<Record>> {
        let value = self
            .inner
            .transport
            .call(Method::Scalar.as_str(), serde_json::to_value(&params)?)
            .await?;
        Ok(serde_json::from_value(value)?)
    }
}

impl Inner {
    fn database(&self, name: &str) -> Option<Arc<ObservableStore>> {
        self.databases.read().get(name).cloned()
    }

    async fn cached_schemas(&self) -> Result<Option<Vec<Schema>>> {
        match self.meta.get_meta(SCHEMA_CACHE_KEY).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn cache_schemas(&self, schemas: &[Schema]) -> Result<()> {
        let raw = serde_json::to_string(schemas)?;
        self.meta.set_meta(SCHEMA_CACHE_KEY, raw).await?;
        Ok(())
    }

    /// Open a store for every schema not already open at the same version.
    ///
    /// A version change rebuilds the local store, dropping its data.
    async fn install(&self, schemas: Vec<Schema>) -> Result<()> {
        for schema in schemas {
            if schema.name == self.options.meta_store {
                tracing::warn!(db = %schema.name, "schema name clashes with the metadata store, skipped");
                continue;
            }
            let current = self
                .databases
                .read()
                .get(&schema.name)
                .map(|db| db.schema().version);
            if current == Some(schema.version) {
                continue;
            }

            let name = schema.name.clone();
            let storage = self.provider.open(&name).await?;
            let store = Arc::new(ObservableStore::open(schema, storage).await?);
            self.watch(&store)?;
            if let Some(previous) = current {
                tracing::info!(db = %name, previous, version = store.schema().version, "schema changed, store rebuilt");
            }
            self.databases.write().insert(name, store);
        }
        Ok(())
    }

    /// Route every local change of `store` to the forwarder.
    fn watch(&self, store: &ObservableStore) -> Result<()> {
        for collection in &store.schema().collections {
            for channel in Channel::ALL {
                let tx = self.local_tx.clone();
                store.add_listener(&collection.name, channel, move |event| {
                    tx.send(event.clone())
                        .map_err(|_| ListenerError::from("client event channel closed"))
                })?;
            }
        }
        Ok(())
    }

    async fn on_connected(&self) -> Result<()> {
        tracing::info!("connected");
        self.outbox.flush().await?;

        let previous = self.state.send_replace(ClientState::SchemaRequested);
        if let Err(e) = self.refresh_schemas().await {
            // Stores restored earlier stay usable.
            self.state.send_replace(previous);
            return Err(e);
        }
        self.state.send_replace(ClientState::Ready);

        let databases: Vec<_> = self.databases.read().values().cloned().collect();
        for db in databases {
            for collection in &db.schema().collections {
                if let Err(e) = self.pull(&db, &collection.name).await {
                    tracing::warn!(db = %db.name(), collection = %collection.name, error = %e, "pull failed");
                }
            }
        }
        Ok(())
    }

    async fn refresh_schemas(&self) -> Result<()> {
        let value = self
            .transport
            .call(Method::Schema.as_str(), Value::Null)
            .await?;
        let schemas: Vec<Schema> = serde_json::from_value(value)?;
        self.install(schemas.clone()).await?;
        self.cache_schemas(&schemas).await
    }

    /// Fetch what changed in `collection` since its high-water mark.
    async fn pull(&self, db: &ObservableStore, collection: &str) -> Result<()> {
        let mark = db.high_water_mark(collection).await?;
        match self.options.pull {
            PullStrategy::Query => {
                let mut query = Query::new();
                if let Some(mark) = mark {
                    query = query.filter(Filter::term(UPDATED_AT, Comparison::Gt, mark));
                }
                let params = QueryParams::new(db.name(), collection, query);
                let value = self
                    .transport
                    .call(Method::Query.as_str(), serde_json::to_value(&params)?)
                    .await?;
                let records: Vec<Record> = serde_json::from_value(value)?;
                let received = records.len();
                let mut applied = 0;
                for record in records {
                    if db.merge(collection, record, Origin::Remote).await?.is_some() {
                        applied += 1;
                    }
                }
                tracing::debug!(db = %db.name(), %collection, ?mark, received, applied, "pulled");
            }
            PullStrategy::Sync => {
                let params = SyncParams {
                    db: db.name().to_string(),
                    collection: collection.to_string(),
                    last_updated_at: mark,
                };
                let pushed = self
                    .transport
                    .call(Method::Sync.as_str(), serde_json::to_value(&params)?)
                    .await?;
                tracing::debug!(db = %db.name(), %collection, ?mark, %pushed, "sync requested");
            }
        }
        Ok(())
    }

    /// Apply a change pushed by the server.
    async fn apply_remote(&self, method: &str, params: Value) -> Result<()> {
        let method: Method = method.parse()?;
        match method {
            Method::Inserted | Method::Updated => {
                let event: SaveEvent = parse_params(params)?;
                let Some(db) = self.database(&event.db) else {
                    tracing::debug!(db = %event.db, "change for unknown database ignored");
                    return Ok(());
                };
                db.merge(&event.collection, event.record, Origin::Remote).await?;
            }
            Method::Deleted => {
                let event: DeleteEvent = parse_params(params)?;
                let Some(db) = self.database(&event.db) else {
                    tracing::debug!(db = %event.db, "change for unknown database ignored");
                    return Ok(());
                };
                db.delete(&event.collection, &event.key, Origin::Remote).await?;
            }
            other => {
                tracing::debug!(method = %other, "unexpected notification ignored");
            }
        }
        Ok(())
    }
}

/// Queue each local change in the order it happened, then send it.
///
/// Sends are awaited one at a time so the server sees writes in the order
/// they were made. Changes that arrive while a send is in flight are queued
/// before the next send. After a lost connection the rest of the batch stays
/// queued for the flush on reconnect.
async fn forward_local(inner: Arc<Inner>, mut local_rx: mpsc::UnboundedReceiver<DbEvent>) {
    while let Some(event) = local_rx.recv().await {
        let mut batch = Vec::new();
        let mut next = Some(event);
        while let Some(event) = next {
            if let Some(entry) = queue_local(&inner, &event).await {
                batch.push(entry);
            }
            next = local_rx.try_recv().ok();
        }

        for entry in batch {
            if let Err(e) = inner.outbox.send(&entry).await {
                if e.is_disconnected() {
                    tracing::debug!(id = entry.id, error = %e, "send deferred to next flush");
                    break;
                }
                tracing::warn!(id = entry.id, action = %entry.action, error = %e, "local change rejected by peer");
            }
        }
    }
}

async fn queue_local(inner: &Inner, event: &DbEvent) -> Option<OutboxEntry> {
    let method = Method::for_channel(event.channel());
    match inner.outbox.enqueue(method.as_str(), event.to_params()).await {
        Ok(entry) => Some(entry),
        Err(e) => {
            tracing::warn!(%method, key = %event.key(), error = %e, "failed to queue local change");
            None
        }
    }
}

async fn run_events(inner: Arc<Inner>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Connected => {
                if let Err(e) = inner.on_connected().await {
                    tracing::warn!(error = %e, "connect handling failed");
                }
            }
            TransportEvent::Disconnected => {
                tracing::info!("disconnected");
            }
            TransportEvent::Notification { method, params } => {
                if let Err(e) = inner.apply_remote(&method, params).await {
                    tracing::warn!(%method, error = %e, "failed to apply remote change");
                }
            }
        }
    }
    tracing::debug!("transport event stream ended");
}
