//! Configuration management for the server.

use ripple_engine::{CollectionSchema, IndexSchema, Schema};
use std::env;
use std::path::PathBuf;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// JSON file holding an array of schemas to serve
    pub schema_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup` instead of the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let port = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let schema_file = lookup("RIPPLE_SCHEMA_FILE")
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            host,
            port,
            schema_file,
        })
    }

    /// Schemas the server hosts: the configured file, or the demo schema.
    pub fn load_schemas(&self) -> Result<Vec<Schema>, ConfigError> {
        let Some(path) = &self.schema_file else {
            return Ok(vec![demo_schema()]);
        };

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::SchemaFile {
            path: path.clone(),
            source,
        })?;
        let schemas: Vec<Schema> = serde_json::from_str(&raw)?;
        for schema in &schemas {
            schema
                .validate()
                .map_err(|e| ConfigError::InvalidSchema(e.to_string()))?;
        }
        Ok(schemas)
    }
}

/// Served when no schema file is configured.
pub fn demo_schema() -> Schema {
    Schema::new("app", 1).with_collection(
        CollectionSchema::new("todos", "id").with_index(IndexSchema::new("by_updated", "updated_at")),
    )
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Cannot read schema file {}: {source}", path.display())]
    SchemaFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::InvalidSchema(e.to_string())
    }
}
