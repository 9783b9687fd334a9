//! Observable store.
//!
//! [`ObservableStore`] wraps a [`Storage`] for one schema. Every successful
//! local write stamps the record's timestamps, persists it and then notifies
//! the collection's listeners before returning the event.
//!
//! Writes carry an [`Origin`]. Changes applied from a peer use
//! [`Origin::Remote`]: their timestamps are kept and listeners are not
//! notified, so a replicated change is never sent back out as a local one.

use crate::events::{
    Channel, DbEvent, DeleteEvent, Dispatcher, ListenerError, ListenerId, SaveEvent,
};
use crate::record::{self, key_of, Origin};
use crate::storage::Storage;
use crate::{
    error::Result, CollectionName, CollectionSchema, Error, Key, Record, Schema, Select,
    Timestamp, WriteClock,
};
use futures::TryStreamExt;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A schema-bound store that emits change events.
pub struct ObservableStore {
    schema: Schema,
    storage: Arc<dyn Storage>,
    dispatchers: HashMap<CollectionName, Dispatcher>,
    clock: WriteClock,
}

impl fmt::Debug for ObservableStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableStore")
            .field("schema", &self.schema.name)
            .field("version", &self.schema.version)
            .field("dispatchers", &self.dispatchers)
            .finish()
    }
}

impl ObservableStore {
    /// Prepare `storage` for `schema` and wrap it.
    ///
    /// A schema name or version different from what the storage holds drops
    /// and recreates every collection.
    pub async fn open(schema: Schema, storage: Arc<dyn Storage>) -> Result<Self> {
        let rebuilt = storage.prepare(&schema).await?;
        let dispatchers = schema
            .collections
            .iter()
            .map(|c| (c.name.clone(), Dispatcher::new(c.name.clone())))
            .collect();
        let store = Self {
            schema,
            storage,
            dispatchers,
            clock: WriteClock::new(),
        };

        // Never stamp below what is already stored.
        for collection in &store.schema.collections {
            if let Some(mark) = store.high_water_mark(&collection.name).await? {
                store.clock.observe(mark);
            }
        }

        tracing::info!(
            db = %store.schema.name,
            version = store.schema.version,
            rebuilt,
            "opened store"
        );
        Ok(store)
    }

    /// Database name, taken from the schema.
    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn clock(&self) -> &WriteClock {
        &self.clock
    }

    fn collection(&self, name: &str) -> Result<&CollectionSchema> {
        self.schema.require_collection(name)
    }

    fn dispatcher(&self, name: &str) -> Result<&Dispatcher> {
        self.dispatchers
            .get(name)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    /// Fill in timestamps. A remote `updated_at` too far in the future is
    /// rejected so it can never drag the clock forward.
    fn stamp(&self, record: &mut Record, origin: Origin, created: bool) -> Result<()> {
        match origin {
            Origin::Local => {
                let now = self.clock.now();
                if created {
                    record::stamp_created(record, now);
                } else {
                    record::stamp_updated(record, now);
                    record::stamp_missing(record, now);
                }
            }
            Origin::Remote => {
                if let Some(seen) = record::updated_at(record) {
                    if !crate::clock::is_plausible(seen) {
                        return Err(Error::InvalidRecord(format!(
                            "updated_at {seen} is too far in the future"
                        )));
                    }
                    self.clock.observe(seen);
                }
                if record::timestamp_of(record, record::CREATED_AT).is_none()
                    || record::updated_at(record).is_none()
                {
                    record::stamp_missing(record, self.clock.now());
                }
            }
        }
        Ok(())
    }

    fn save_event(&self, collection: &CollectionSchema, record: Record) -> Result<SaveEvent> {
        let key = key_of(&record, &collection.key_path).ok_or_else(|| Error::MissingKey {
            collection: collection.name.clone(),
            key_path: collection.key_path.clone(),
        })?;
        Ok(SaveEvent {
            db: self.schema.name.clone(),
            collection: collection.name.clone(),
            key,
            key_path: collection.key_path.clone(),
            record,
        })
    }

    fn notify(&self, origin: Origin, event: DbEvent) -> Result<()> {
        if origin.notifies() {
            let dispatcher = self.dispatcher(event.collection())?;
            let delivered = dispatcher.dispatch(&event);
            tracing::trace!(
                collection = %event.collection(),
                channel = %event.channel(),
                delivered,
                "dispatched event"
            );
        }
        Ok(())
    }

    /// Insert a new record.
    ///
    /// A record without a key gets a generated one, unless the collection is
    /// auto-increment, in which case storage assigns it. Fails with
    /// `DuplicateKey` if the key is taken.
    pub async fn insert(
        &self,
        collection: &str,
        mut record: Record,
        origin: Origin,
    ) -> Result<SaveEvent> {
        let schema = self.collection(collection)?;
        if !schema.auto_increment && key_of(&record, &schema.key_path).is_none() {
            record.insert(schema.key_path.clone(), Key::generate().to_value());
        }
        self.stamp(&mut record, origin, true)?;

        let stored = self.storage.add(collection, record).await?;
        let event = self.save_event(schema, stored)?;
        tracing::debug!(db = %self.name(), %collection, key = %event.key, ?origin, "inserted");
        self.notify(origin, DbEvent::Inserted(event.clone()))?;
        Ok(event)
    }

    /// Write a record, replacing any record with the same key.
    pub async fn update(
        &self,
        collection: &str,
        mut record: Record,
        origin: Origin,
    ) -> Result<SaveEvent> {
        let schema = self.collection(collection)?;
        self.stamp(&mut record, origin, false)?;

        let stored = self.storage.put(collection, record).await?;
        let event = self.save_event(schema, stored)?;
        tracing::debug!(db = %self.name(), %collection, key = %event.key, ?origin, "updated");
        self.notify(origin, DbEvent::Updated(event.clone()))?;
        Ok(event)
    }

    /// Insert or update depending on whether the key already exists.
    ///
    /// The existence probe and the write are separate storage calls, so two
    /// concurrent upserts of the same new key can both choose insert and the
    /// second fails with `DuplicateKey`. Replication uses [`merge`](Self::merge).
    pub async fn upsert(&self, collection: &str, record: Record, origin: Origin) -> Result<DbEvent> {
        let schema = self.collection(collection)?;
        let exists = match key_of(&record, &schema.key_path) {
            Some(key) => self.storage.get(collection, &key).await?.is_some(),
            None => false,
        };
        if exists {
            self.update(collection, record, origin)
                .await
                .map(DbEvent::Updated)
        } else {
            self.insert(collection, record, origin)
                .await
                .map(DbEvent::Inserted)
        }
    }

    /// Remove a record by key. Removing an absent key still succeeds.
    pub async fn delete(&self, collection: &str, key: &Key, origin: Origin) -> Result<DeleteEvent> {
        let schema = self.collection(collection)?;
        self.storage.delete(collection, key).await?;
        let event = DeleteEvent {
            db: self.schema.name.clone(),
            collection: schema.name.clone(),
            key: key.clone(),
            key_path: schema.key_path.clone(),
        };
        tracing::debug!(db = %self.name(), %collection, %key, ?origin, "deleted");
        self.notify(origin, DbEvent::Deleted(event.clone()))?;
        Ok(event)
    }

    /// Newest-wins write used when applying replicated changes.
    ///
    /// Skipped, returning `None`, when the stored record has a strictly newer
    /// `updated_at` than the incoming one. Otherwise behaves like
    /// [`update`](Self::update), so applying the same change twice is harmless.
    pub async fn merge(
        &self,
        collection: &str,
        record: Record,
        origin: Origin,
    ) -> Result<Option<SaveEvent>> {
        let schema = self.collection(collection)?;
        let key = key_of(&record, &schema.key_path).ok_or_else(|| Error::MissingKey {
            collection: schema.name.clone(),
            key_path: schema.key_path.clone(),
        })?;

        let existing = self.storage.get(collection, &key).await?;
        if let (Some(stored), Some(incoming)) = (
            existing.as_ref().and_then(record::updated_at),
            record::updated_at(&record),
        ) {
            if stored > incoming {
                tracing::debug!(
                    db = %self.name(),
                    %collection,
                    %key,
                    stored,
                    incoming,
                    "kept newer local record"
                );
                return Ok(None);
            }
        }

        let mut record = record;
        self.stamp(&mut record, origin, false)?;
        let stored = self.storage.put(collection, record).await?;
        let event = self.save_event(schema, stored)?;
        let notification = if existing.is_some() {
            DbEvent::Updated(event.clone())
        } else {
            DbEvent::Inserted(event.clone())
        };
        tracing::debug!(db = %self.name(), %collection, %key, ?origin, "merged");
        self.notify(origin, notification)?;
        Ok(Some(event))
    }

    pub async fn get(&self, collection: &str, key: &Key) -> Result<Option<Record>> {
        self.collection(collection)?;
        self.storage.get(collection, key).await
    }

    /// Start a query on `collection`. Fails immediately for an unknown collection.
    pub fn select(&self, collection: &str) -> Result<Select> {
        Select::new(&self.schema, collection, self.storage.clone())
    }

    /// Highest `updated_at` stored in `collection`, or `None` when empty.
    pub async fn high_water_mark(&self, collection: &str) -> Result<Option<Timestamp>> {
        self.collection(collection)?;
        self.storage
            .cursor(collection)
            .try_fold(None, |mark: Option<Timestamp>, record| async move {
                Ok::<_, Error>(match record::updated_at(&record) {
                    Some(ts) => Some(mark.map_or(ts, |m| m.max(ts))),
                    None => mark,
                })
            })
            .await
    }

    /// Register a listener for one channel of one collection.
    pub fn add_listener<F>(&self, collection: &str, channel: Channel, listener: F) -> Result<ListenerId>
    where
        F: Fn(&DbEvent) -> std::result::Result<(), ListenerError> + Send + Sync + 'static,
    {
        Ok(self.dispatcher(collection)?.add(channel, listener))
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, collection: &str, id: ListenerId) -> Result<bool> {
        Ok(self.dispatcher(collection)?.remove(id))
    }

    pub fn listener_count(&self, collection: &str, channel: Channel) -> Result<usize> {
        Ok(self.dispatcher(collection)?.listener_count(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{into_record, CREATED_AT, UPDATED_AT};
    use crate::MemoryStorage;
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    fn schema() -> Schema {
        Schema::new("app", 1)
            .with_collection(CollectionSchema::new("todos", "id"))
            .with_collection(CollectionSchema::new("log", "seq").auto_increment())
    }

    fn record(value: Value) -> Record {
        into_record(value).unwrap()
    }

    async fn store() -> ObservableStore {
        ObservableStore::open(schema(), Arc::new(MemoryStorage::new()))
            .await
            .unwrap()
    }

    fn capture(store: &ObservableStore, collection: &str, channel: Channel) -> Arc<Mutex<Vec<DbEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        store
            .add_listener(collection, channel, move |e| {
                sink.lock().push(e.clone());
                Ok(())
            })
            .unwrap();
        seen
    }

    #[tokio::test]
    async fn insert_generates_key_and_stamps() {
        let store = store().await;
        let inserted = capture(&store, "todos", Channel::Inserted);

        let event = store
            .insert("todos", record(json!({"title": "a"})), Origin::Local)
            .await
            .unwrap();

        assert_eq!(event.db, "app");
        assert_eq!(event.collection, "todos");
        assert_eq!(event.key_path, "id");
        assert!(matches!(event.key, Key::Text(_)));
        assert_eq!(event.record["id"], event.key.to_value());
        assert!(event.record.get(CREATED_AT).is_some());
        assert_eq!(event.record.get(CREATED_AT), event.record.get(UPDATED_AT));

        let seen = inserted.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], DbEvent::Inserted(event.clone()));
    }

    #[tokio::test]
    async fn insert_auto_increment() {
        let store = store().await;
        let event = store
            .insert("log", record(json!({"msg": "hi"})), Origin::Local)
            .await
            .unwrap();
        assert_eq!(event.key, Key::Int(1));
    }

    #[tokio::test]
    async fn duplicate_insert_fails() {
        let store = store().await;
        store
            .insert("todos", record(json!({"id": "x"})), Origin::Local)
            .await
            .unwrap();
        let err = store
            .insert("todos", record(json!({"id": "x"})), Origin::Local)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateKey { .. }));
    }

    #[tokio::test]
    async fn update_restamps_updated_at() {
        let store = store().await;
        let updated = capture(&store, "todos", Channel::Updated);
        let first = store
            .insert("todos", record(json!({"id": "x", "n": 1})), Origin::Local)
            .await
            .unwrap();

        let mut changed = first.record.clone();
        changed.insert("n".into(), json!(2));
        let second = store.update("todos", changed, Origin::Local).await.unwrap();

        let before = record::updated_at(&first.record).unwrap();
        let after = record::updated_at(&second.record).unwrap();
        assert!(after > before);
        assert_eq!(
            second.record.get(CREATED_AT),
            first.record.get(CREATED_AT)
        );
        assert_eq!(updated.lock().len(), 1);
    }

    #[tokio::test]
    async fn upsert_routes_by_existence() {
        let store = store().await;
        let first = store
            .upsert("todos", record(json!({"id": "u"})), Origin::Local)
            .await
            .unwrap();
        assert_eq!(first.channel(), Channel::Inserted);
        let second = store
            .upsert("todos", record(json!({"id": "u", "v": 1})), Origin::Local)
            .await
            .unwrap();
        assert_eq!(second.channel(), Channel::Updated);
    }

    #[tokio::test]
    async fn delete_notifies_without_body() {
        let store = store().await;
        let deleted = capture(&store, "todos", Channel::Deleted);
        store
            .insert("todos", record(json!({"id": "d"})), Origin::Local)
            .await
            .unwrap();

        let event = store
            .delete("todos", &Key::from("d"), Origin::Local)
            .await
            .unwrap();
        assert_eq!(event.key, Key::from("d"));
        assert!(store.get("todos", &Key::from("d")).await.unwrap().is_none());
        assert!(deleted.lock()[0].record().is_none());

        // Deleting again is a no-op, not an error.
        store
            .delete("todos", &Key::from("d"), Origin::Local)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn remote_writes_keep_timestamps_and_stay_silent() {
        let store = store().await;
        let inserted = capture(&store, "todos", Channel::Inserted);
        let updated = capture(&store, "todos", Channel::Updated);

        let event = store
            .update(
                "todos",
                record(json!({"id": "r", "created_at": 5, "updated_at": 7})),
                Origin::Remote,
            )
            .await
            .unwrap();
        assert_eq!(record::updated_at(&event.record), Some(7));
        assert!(inserted.lock().is_empty());
        assert!(updated.lock().is_empty());
    }

    #[tokio::test]
    async fn merge_newest_wins() {
        let store = store().await;
        let newer = record(json!({"id": "m", "v": "new", "created_at": 1, "updated_at": 200}));
        let older = record(json!({"id": "m", "v": "old", "created_at": 1, "updated_at": 100}));

        assert!(store.merge("todos", newer.clone(), Origin::Remote).await.unwrap().is_some());
        assert!(store.merge("todos", older, Origin::Remote).await.unwrap().is_none());
        let stored = store.get("todos", &Key::from("m")).await.unwrap().unwrap();
        assert_eq!(stored["v"], "new");

        // Same change twice is an idempotent overwrite.
        assert!(store.merge("todos", newer, Origin::Remote).await.unwrap().is_some());
        assert_eq!(store.select("todos").unwrap().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn merge_requires_key() {
        let store = store().await;
        let err = store
            .merge("todos", record(json!({"v": 1})), Origin::Remote)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingKey { .. }));
    }

    #[tokio::test]
    async fn local_write_after_remote_stamps_newer() {
        let store = store().await;
        let far_future = crate::clock::wall_clock_millis() + 60_000;
        store
            .merge(
                "todos",
                record(json!({"id": "f", "updated_at": far_future})),
                Origin::Remote,
            )
            .await
            .unwrap();

        let local = store
            .insert("todos", record(json!({"id": "g"})), Origin::Local)
            .await
            .unwrap();
        assert!(record::updated_at(&local.record).unwrap() > far_future);
        assert_eq!(
            store.high_water_mark("todos").await.unwrap(),
            record::updated_at(&local.record)
        );
    }

    #[tokio::test]
    async fn remote_timestamp_far_in_future_is_rejected() {
        let store = store().await;
        let err = store
            .merge(
                "todos",
                record(json!({"id": "a", "updated_at": u64::MAX})),
                Origin::Remote,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRecord(_)));
        assert!(store.get("todos", &Key::from("a")).await.unwrap().is_none());

        let local = store
            .insert("todos", record(json!({"id": "b"})), Origin::Local)
            .await
            .unwrap();
        let stamped = record::updated_at(&local.record).unwrap();
        assert!(stamped < crate::clock::wall_clock_millis() + 60_000);
        assert_eq!(store.high_water_mark("todos").await.unwrap(), Some(stamped));
    }

    #[tokio::test]
    async fn high_water_mark_empty() {
        let store = store().await;
        assert_eq!(store.high_water_mark("todos").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_collection_is_configuration_error() {
        let store = store().await;
        let err = store.select("ghosts").unwrap_err();
        assert_eq!(err.to_string(), "collection schema not found: ghosts");
        assert!(store
            .add_listener("ghosts", Channel::Inserted, |_| Ok(()))
            .is_err());
        assert!(store
            .insert("ghosts", Record::new(), Origin::Local)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn reopen_seeds_clock_from_storage() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let first = ObservableStore::open(schema(), storage.clone()).await.unwrap();
        let mark = crate::clock::wall_clock_millis() + 120_000;
        first
            .update("todos", record(json!({"id": "z", "updated_at": mark})), Origin::Remote)
            .await
            .unwrap();

        let reopened = ObservableStore::open(schema(), storage).await.unwrap();
        assert!(reopened.clock().last() >= mark);
        assert_eq!(reopened.select("todos").unwrap().count().await.unwrap(), 1);
    }
}
