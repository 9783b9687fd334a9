//! Replication endpoint routes.

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{get_schema, list_schemas, rpc_handler, ws_handler};
use crate::AppState;

/// Create replication routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/rpc", post(rpc_handler))
        .route("/schema", get(list_schemas))
        .route("/schema/{db}", get(get_schema))
}
