//! Canonical databases held by the server.

use std::sync::Arc;

use dashmap::DashMap;
use ripple_engine::{MemoryStorage, ObservableStore, Schema};

use crate::error::{AppError, Result};

/// Named [`ObservableStore`]s, one per hosted schema.
#[derive(Debug, Default)]
pub struct DatabaseRegistry {
    databases: DashMap<String, Arc<ObservableStore>>,
}

impl DatabaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry hosting every schema in `schemas`.
    pub async fn with_schemas(schemas: Vec<Schema>) -> Result<Self> {
        let registry = Self::new();
        for schema in schemas {
            registry.register(schema).await?;
        }
        Ok(registry)
    }

    /// Host `schema` in fresh in-memory storage, replacing a database of the same name.
    pub async fn register(&self, schema: Schema) -> Result<Arc<ObservableStore>> {
        let name = schema.name.clone();
        let store = Arc::new(ObservableStore::open(schema, Arc::new(MemoryStorage::new())).await?);
        self.databases.insert(name, store.clone());
        Ok(store)
    }

    /// Look up a database, failing with `Database not found: <name>`.
    pub fn get(&self, name: &str) -> Result<Arc<ObservableStore>> {
        self.databases
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::DatabaseNotFound(name.to_string()))
    }

    /// Schemas of all databases, or of the one named by `only`, sorted by name.
    pub fn schemas(&self, only: Option<&str>) -> Result<Vec<Schema>> {
        if let Some(name) = only {
            return Ok(vec![self.get(name)?.schema().clone()]);
        }
        let mut schemas: Vec<Schema> = self
            .databases
            .iter()
            .map(|entry| entry.value().schema().clone())
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(schemas)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.databases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.databases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_engine::CollectionSchema;

    fn schema(name: &str) -> Schema {
        Schema::new(name, 1).with_collection(CollectionSchema::new("items", "id"))
    }

    #[tokio::test]
    async fn test_lookup() {
        let registry = DatabaseRegistry::with_schemas(vec![schema("b"), schema("a")])
            .await
            .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert_eq!(registry.get("a").unwrap().name(), "a");

        let err = registry.get("missing").unwrap_err();
        assert_eq!(err.to_string(), "Database not found: missing");
    }

    #[tokio::test]
    async fn test_schemas_filter() {
        let registry = DatabaseRegistry::with_schemas(vec![schema("b"), schema("a")])
            .await
            .unwrap();
        let all = registry.schemas(None).unwrap();
        assert_eq!(all.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(registry.schemas(Some("b")).unwrap(), vec![schema("b")]);
        assert!(registry.schemas(Some("c")).is_err());
    }
}
