use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};

use crate::stats::StatsSnapshot;
use crate::AppState;

/// GET /stats
async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsSnapshot> {
    Json(state.service.stats().await)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/stats", get(stats))
        .with_state(state)
}
