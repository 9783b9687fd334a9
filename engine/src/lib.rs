//! # Ripple Engine
//!
//! Local persistence and query engine for replicated, schema-described
//! databases.
//!
//! This crate holds everything a replication client and server share: record
//! and schema types, the filter/order/select query engine, the storage
//! collaborator trait with an in-memory implementation, the observable store
//! that turns writes into change events, and the wire protocol.
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] is a JSON object. Each collection names a key path, the field
//! holding the record's [`Key`]. The store stamps `created_at` and
//! `updated_at` (milliseconds since the epoch) on every write; `updated_at` is
//! the high-water mark used for incremental sync.
//!
//! ### Queries
//!
//! A [`Filter`] is a term or a chain of terms joined by AND/OR, evaluated
//! strictly left to right. [`OrderBy`] is a stable multi-key sort. A
//! [`Select`] always filters, then orders, then applies `offset`/`limit`.
//!
//! ### Events
//!
//! [`ObservableStore`] notifies per-collection listeners on the
//! `INSERTED`, `UPDATED` and `DELETED` channels. Writes tagged
//! [`Origin::Remote`] are applied silently so replicated changes are not
//! echoed back.
//!
//! ## Quick Start
//!
//! ```rust
//! use ripple_engine::{
//!     CollectionSchema, Comparison, Filter, MemoryStorage, ObservableStore, Origin, Schema,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let schema = Schema::new("app", 1).with_collection(CollectionSchema::new("todos", "id"));
//! let store = ObservableStore::open(schema, Arc::new(MemoryStorage::new()))
//!     .await
//!     .unwrap();
//!
//! let record = json!({"title": "write docs", "done": false});
//! store
//!     .insert("todos", record.as_object().cloned().unwrap(), Origin::Local)
//!     .await
//!     .unwrap();
//!
//! let open = store
//!     .select("todos")
//!     .unwrap()
//!     .filter(Filter::term("done", Comparison::Eq, false))
//!     .all()
//!     .await
//!     .unwrap();
//! assert_eq!(open.len(), 1);
//! # }
//! ```

pub mod clock;
pub mod error;
pub mod events;
pub mod filter;
pub mod memory;
pub mod order;
pub mod protocol;
pub mod record;
pub mod schema;
pub mod select;
pub mod storage;
pub mod store;
pub mod value;

// Re-export main types at crate root
pub use clock::WriteClock;
pub use error::Error;
pub use events::{
    Channel, DbEvent, DeleteEvent, Dispatcher, Listener, ListenerError, ListenerId, SaveEvent,
};
pub use filter::{Comparison, Filter, FilterExpression, FilterNode, FilterTerm, FilterType, Junction};
pub use memory::{MemoryProvider, MemoryStorage};
pub use order::{OrderBy, OrderKey};
pub use protocol::{
    Method, QueryParams, RequestId, RpcError, RpcMessage, RpcRequest, RpcResponse, SyncParams,
};
pub use record::{Key, Origin, Record};
pub use schema::{CollectionSchema, IndexSchema, Schema};
pub use select::{Query, Select};
pub use storage::{RecordStream, Storage, StorageProvider};
pub use store::ObservableStore;

/// Type aliases for clarity
pub type CollectionName = String;
pub type Timestamp = u64;
pub type SchemaVersion = u32;
