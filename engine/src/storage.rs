//! The storage collaborator.
//!
//! The store and query engine only need a key-indexed record store per
//! collection plus a small metadata area. [`Storage`] is that seam;
//! [`MemoryStorage`](crate::MemoryStorage) is the bundled implementation.

use crate::{error::Result, Key, Record, Schema};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

/// A lazy stream over the records of one collection.
///
/// Dropping it stops iteration; asking the storage for a new cursor starts
/// again from the beginning.
pub type RecordStream<'a> = BoxStream<'a, Result<Record>>;

/// A per-collection, key-indexed record store.
///
/// All record operations fail with
/// [`Error::CollectionNotFound`](crate::Error::CollectionNotFound) for a
/// collection the prepared schema does not declare.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Make the physical collections match `schema`.
    ///
    /// When the stored schema name or version differs, every collection is
    /// dropped and recreated empty. Returns whether that rebuild happened.
    /// Metadata survives a rebuild.
    async fn prepare(&self, schema: &Schema) -> Result<bool>;

    async fn get(&self, collection: &str, key: &Key) -> Result<Option<Record>>;

    async fn get_all(&self, collection: &str) -> Result<Vec<Record>>;

    /// Iterate a collection in no guaranteed order.
    fn cursor<'a>(&'a self, collection: &'a str) -> RecordStream<'a>;

    /// Insert a new record, failing with `DuplicateKey` if the key exists.
    ///
    /// For auto-increment collections a record without a key is assigned the
    /// next integer key. Returns the record as stored.
    async fn add(&self, collection: &str, record: Record) -> Result<Record>;

    /// Insert or overwrite the record with the same key. Returns the record as stored.
    async fn put(&self, collection: &str, record: Record) -> Result<Record>;

    /// Remove a record. Removing an absent key is a no-op.
    async fn delete(&self, collection: &str, key: &Key) -> Result<()>;

    async fn get_meta(&self, key: &str) -> Result<Option<String>>;

    async fn set_meta(&self, key: &str, value: String) -> Result<()>;
}

/// Opens named storages.
///
/// Opening the same name twice returns the same underlying storage, so data
/// written through one handle is visible through the other.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    async fn open(&self, name: &str) -> Result<Arc<dyn Storage>>;
}
