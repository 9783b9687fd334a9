//! HTTP handlers for single requests and schema lookup.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ripple_engine::Schema;

use crate::error::Result;
use crate::server::HTTP_ORIGIN;
use crate::AppState;

/// POST /rpc - Handle one JSON-RPC request.
///
/// Writes made here are pushed to every socket. A notification gets
/// `204 No Content`.
pub async fn rpc_handler(State(state): State<AppState>, body: String) -> Response {
    match state.server.handle_text(HTTP_ORIGIN, &body).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// GET /schema - All hosted schemas.
pub async fn list_schemas(State(state): State<AppState>) -> Result<Json<Vec<Schema>>> {
    Ok(Json(state.server.registry().schemas(None)?))
}

/// GET /schema/{db} - One hosted schema.
pub async fn get_schema(
    State(state): State<AppState>,
    Path(db): Path<String>,
) -> Result<Json<Schema>> {
    let store = state.server.registry().get(&db)?;
    Ok(Json(store.schema().clone()))
}
