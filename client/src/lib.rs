//! # Ripple Client
//!
//! Client half of Ripple replication: keeps local [`ObservableStore`]s in sync
//! with a replication server over any [`Transport`].
//!
//! Local writes are persisted in the [`Outbox`] before they are sent and are
//! resent after a reconnect until the server acknowledges them. Changes coming
//! from the server are applied without being echoed back.
//!
//! ```ignore
//! let client = ReplicationClient::new(transport, provider, ClientOptions::default()).await?;
//! let _handle = client.start()?;
//! client.wait_until_ready().await?;
//! let todos = client.database("app").unwrap();
//! todos.insert("todos", record, Origin::Local).await?;
//! ```
//!
//! [`ObservableStore`]: ripple_engine::ObservableStore

mod client;
mod error;
mod outbox;
mod transport;

pub use client::{
    ClientHandle, ClientOptions, ClientState, PullStrategy, ReplicationClient, SCHEMA_CACHE_KEY,
};
pub use error::{Error, Result, TransportError};
pub use outbox::{FlushReport, Outbox, OutboxEntry, OUTBOX_COLLECTION, OUTBOX_SCHEMA};
pub use transport::{Transport, TransportEvent};
