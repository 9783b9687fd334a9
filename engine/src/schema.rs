//! Schema definition.
//!
//! A schema names and versions a logical database and describes its
//! collections. It is fixed for the lifetime of a store; a new version means
//! the physical collections are dropped and recreated.

use crate::{error::Result, CollectionName, Error, SchemaVersion};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

fn default_key_path() -> String {
    "id".to_string()
}

/// A secondary index on a collection.
///
/// Indexes are passed through to the storage engine; queries here always scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSchema {
    /// Index name
    pub name: String,
    /// Field the index is built on
    pub key_path: String,
    /// Whether the indexed value must be unique
    #[serde(default)]
    pub unique: bool,
}

impl IndexSchema {
    /// Create a non-unique index on `key_path`.
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            unique: false,
        }
    }

    /// Create a unique index on `key_path`.
    pub fn unique(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            unique: true,
            ..Self::new(name, key_path)
        }
    }
}

/// Schema for a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchema {
    /// Collection name
    pub name: CollectionName,
    /// Field that uniquely identifies a record
    #[serde(default = "default_key_path")]
    pub key_path: String,
    /// Whether storage assigns integer keys
    #[serde(default)]
    pub auto_increment: bool,
    /// Secondary indexes
    #[serde(default)]
    pub indexes: Vec<IndexSchema>,
}

impl CollectionSchema {
    /// Create a collection keyed by `key_path`.
    pub fn new(name: impl Into<CollectionName>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            auto_increment: false,
            indexes: Vec::new(),
        }
    }

    /// Builder-style toggle for storage-assigned keys.
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Builder-style method to add an index.
    pub fn with_index(mut self, index: IndexSchema) -> Self {
        self.indexes.push(index);
        self
    }
}

/// Schema for a logical database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Database name
    pub name: String,
    /// Schema version; a change rebuilds storage
    pub version: SchemaVersion,
    /// Collection schemas, in declaration order
    #[serde(default)]
    pub collections: Vec<CollectionSchema>,
}

impl Schema {
    /// Create a new schema with no collections.
    pub fn new(name: impl Into<String>, version: SchemaVersion) -> Self {
        Self {
            name: name.into(),
            version,
            collections: Vec::new(),
        }
    }

    /// Add a collection to the schema, replacing one with the same name.
    pub fn add_collection(&mut self, collection: CollectionSchema) -> &mut Self {
        self.collections.retain(|c| c.name != collection.name);
        self.collections.push(collection);
        self
    }

    /// Builder-style method to add a collection.
    pub fn with_collection(mut self, collection: CollectionSchema) -> Self {
        self.add_collection(collection);
        self
    }

    /// Get a collection schema by name.
    pub fn get_collection(&self, name: &str) -> Option<&CollectionSchema> {
        self.collections.iter().find(|c| c.name == name)
    }

    /// Get a collection schema by name, failing if it is not declared.
    pub fn require_collection(&self, name: &str) -> Result<&CollectionSchema> {
        self.get_collection(name)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    /// Check the schema is usable: named, with uniquely named, keyed collections.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidParams("schema name is empty".into()));
        }
        let mut seen = HashSet::new();
        for collection in &self.collections {
            if collection.name.is_empty() {
                return Err(Error::InvalidParams(format!(
                    "schema '{}' has a collection without a name",
                    self.name
                )));
            }
            if collection.key_path.is_empty() {
                return Err(Error::InvalidParams(format!(
                    "collection '{}' has an empty keyPath",
                    collection.name
                )));
            }
            if !seen.insert(collection.name.as_str()) {
                return Err(Error::InvalidParams(format!(
                    "collection '{}' is declared twice",
                    collection.name
                )));
            }
        }
        Ok(())
    }
}
