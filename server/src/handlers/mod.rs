//! Request handlers for the HTTP and WebSocket surface.

mod rpc;
mod websocket;

pub use rpc::*;
pub use websocket::*;
