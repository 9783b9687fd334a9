//! In-memory storage.

use crate::record::key_of;
use crate::storage::{RecordStream, Storage, StorageProvider};
use crate::{error::Result, Error, Key, Record, Schema, SchemaVersion};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

#[derive(Debug)]
struct Table {
    key_path: String,
    auto_increment: bool,
    rows: BTreeMap<Key, Record>,
    next_id: i64,
}

#[derive(Debug, Default)]
struct Inner {
    /// Name and version of the last prepared schema
    prepared: Option<(String, SchemaVersion)>,
    tables: HashMap<String, Table>,
    meta: HashMap<String, String>,
}

impl Inner {
    fn table(&self, collection: &str) -> Result<&Table> {
        self.tables
            .get(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))
    }

    fn table_mut(&mut self, collection: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))
    }
}

/// A [`Storage`] that keeps everything in process memory.
///
/// Records are kept in key order, so cursors and `get_all` return them sorted
/// by key even though callers must not rely on it.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: RwLock<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name and version of the prepared schema, if any.
    pub fn prepared(&self) -> Option<(String, SchemaVersion)> {
        self.inner.read().prepared.clone()
    }

    fn write(&self, collection: &str, mut record: Record, overwrite: bool) -> Result<Record> {
        let mut inner = self.inner.write();
        let table = inner.table_mut(collection)?;
        let key = match key_of(&record, &table.key_path) {
            Some(key) => key,
            None if table.auto_increment => {
                let key = Key::Int(table.next_id);
                record.insert(table.key_path.clone(), key.to_value());
                key
            }
            None => {
                return Err(Error::MissingKey {
                    collection: collection.to_string(),
                    key_path: table.key_path.clone(),
                })
            }
        };
        if !overwrite && table.rows.contains_key(&key) {
            return Err(Error::DuplicateKey {
                collection: collection.to_string(),
                key,
            });
        }
        if let Key::Int(id) = key {
            table.next_id = table.next_id.max(id.saturating_add(1));
        }
        table.rows.insert(key, record.clone());
        Ok(record)
    }

    fn next_after(&self, collection: &str, from: Bound<Key>) -> Option<Result<(Key, Record)>> {
        let inner = self.inner.read();
        let table = match inner.table(collection) {
            Ok(table) => table,
            Err(e) => return Some(Err(e)),
        };
        table
            .rows
            .range((from, Bound::Unbounded))
            .next()
            .map(|(key, record)| Ok((key.clone(), record.clone())))
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn prepare(&self, schema: &Schema) -> Result<bool> {
        schema.validate()?;
        let mut inner = self.inner.write();
        let wanted = (schema.name.clone(), schema.version);
        if inner.prepared.as_ref() == Some(&wanted) {
            return Ok(false);
        }
        inner.tables = schema
            .collections
            .iter()
            .map(|c| {
                let table = Table {
                    key_path: c.key_path.clone(),
                    auto_increment: c.auto_increment,
                    rows: BTreeMap::new(),
                    next_id: 1,
                };
                (c.name.clone(), table)
            })
            .collect();
        tracing::debug!(
            schema = %schema.name,
            version = schema.version,
            collections = schema.collections.len(),
            "rebuilt memory storage"
        );
        inner.prepared = Some(wanted);
        Ok(true)
    }

    async fn get(&self, collection: &str, key: &Key) -> Result<Option<Record>> {
        let inner = self.inner.read();
        Ok(inner.table(collection)?.rows.get(key).cloned())
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Record>> {
        let inner = self.inner.read();
        Ok(inner.table(collection)?.rows.values().cloned().collect())
    }

    fn cursor<'a>(&'a self, collection: &'a str) -> RecordStream<'a> {
        stream::unfold(Some(Bound::Unbounded), move |from| async move {
            match self.next_after(collection, from?)? {
                Ok((key, record)) => Some((Ok(record), Some(Bound::Excluded(key)))),
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed()
    }

    async fn add(&self, collection: &str, record: Record) -> Result<Record> {
        self.write(collection, record, false)
    }

    async fn put(&self, collection: &str, record: Record) -> Result<Record> {
        self.write(collection, record, true)
    }

    async fn delete(&self, collection: &str, key: &Key) -> Result<()> {
        let mut inner = self.inner.write();
        inner.table_mut(collection)?.rows.remove(key);
        Ok(())
    }

    async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.read().meta.get(key).cloned())
    }

    async fn set_meta(&self, key: &str, value: String) -> Result<()> {
        self.inner.write().meta.insert(key.to_string(), value);
        Ok(())
    }
}

/// Hands out [`MemoryStorage`] instances by name.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    storages: RwLock<HashMap<String, Arc<MemoryStorage>>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of every storage opened so far.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.storages.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl StorageProvider for MemoryProvider {
    async fn open(&self, name: &str) -> Result<Arc<dyn Storage>> {
        let storage: Arc<dyn Storage> = self
            .storages
            .write()
            .entry(name.to_string())
            .or_default()
            .clone();
        Ok(storage)
    }
}
