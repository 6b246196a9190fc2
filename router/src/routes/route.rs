//! POST /route - classify (or bypass) and dispatch a request.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use turnstile_common::{RouteRequest, RouteResponse};

use crate::error::{Error, Result};
use crate::logging::SESSION_HEADER;
use crate::AppState;

async fn route(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: std::result::Result<Json<RouteRequest>, JsonRejection>,
) -> Result<Json<RouteResponse>> {
    let Json(mut request) = body.map_err(|e| Error::InvalidRequest(e.body_text()))?;

    // The body wins when both carry a session id.
    if request.session_id.is_none() {
        if let Some(value) = headers.get(SESSION_HEADER) {
            let id = value
                .to_str()
                .map_err(|_| Error::InvalidRequest("X-Session-Id is not valid text".to_string()))?;
            request.session_id = Some(id.to_string());
        }
    }

    let response = state.service.route(request).await?;
    Ok(Json(response))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/route", post(route))
        .with_state(state)
}
