//! Error types for the Ripple engine.

use crate::{CollectionName, Key};
use thiserror::Error;

/// All possible errors from the Ripple engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Configuration errors
    #[error("collection schema not found: {0}")]
    CollectionNotFound(CollectionName),

    // Record errors
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("record in '{collection}' has no usable key at '{key_path}'")]
    MissingKey {
        collection: CollectionName,
        key_path: String,
    },

    #[error("duplicate key {key} in collection '{collection}'")]
    DuplicateKey {
        collection: CollectionName,
        key: Key,
    },

    // Query errors
    #[error("Unknown comparison: {0}")]
    UnknownComparison(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    // Protocol errors
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    // Storage errors
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
