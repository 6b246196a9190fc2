//! Session inspection and removal.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use turnstile_common::SessionSummary;

use crate::error::Result;
use crate::AppState;

#[derive(Serialize)]
struct DeleteResponse {
    session_id: String,
    deleted: bool,
}

/// GET /sessions/{id}
async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionSummary>> {
    Ok(Json(state.service.session(&id).await?))
}

/// DELETE /sessions/{id} - idempotent; `deleted` tells whether it existed.
async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let deleted = state.service.delete_session(&id).await?;
    Ok(Json(DeleteResponse {
        session_id: id,
        deleted,
    }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/sessions/:id", get(get_session).delete(delete_session))
        .with_state(state)
}
