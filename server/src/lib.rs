//! Ripple Server - replication hub for local-first clients.
//!
//! Hosts the canonical copy of each database in memory, applies writes from
//! clients and pushes them to every other connected client. Clients talk
//! JSON-RPC 2.0 over a WebSocket at `/ws`; single requests can also be made
//! with `POST /rpc`.

pub mod config;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod routes;
pub mod server;
pub mod websocket;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use config::{Config, ConfigError};
pub use error::{AppError, Result};
pub use registry::DatabaseRegistry;
pub use server::{Lifecycle, ReplicationServer, HTTP_ORIGIN};
pub use websocket::{ConnectionManager, ServerMessage};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub server: Arc<ReplicationServer>,
    pub config: Arc<Config>,
}

/// Build the router with tracing and permissive CORS.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Install the global tracing subscriber, honouring `RUST_LOG`.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ripple_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
