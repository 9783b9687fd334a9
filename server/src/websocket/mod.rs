//! WebSocket support for live replication.
//!
//! Each socket is registered with the [`ConnectionManager`], which pushes
//! other peers' changes to it as they are applied.

mod manager;
mod protocol;

pub use manager::{Connection, ConnectionManager, MessageSender};
pub use protocol::*;
