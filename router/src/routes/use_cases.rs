//! GET /use-cases - the use cases the router knows and who serves them.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use turnstile_common::UseCase;

use crate::AppState;

#[derive(Debug, Serialize)]
struct UseCaseEntry {
    id: UseCase,
    description: &'static str,
    backend: String,
    adapter: &'static str,
}

#[derive(Debug, Serialize)]
struct UseCasesResponse {
    use_cases: Vec<UseCaseEntry>,
}

async fn list_use_cases(State(state): State<Arc<AppState>>) -> Json<UseCasesResponse> {
    let use_cases = state
        .service
        .registry()
        .entries()
        .map(|(use_case, backend)| UseCaseEntry {
            id: use_case,
            description: use_case.description(),
            backend: backend.name.clone(),
            adapter: backend.adapter.as_str(),
        })
        .collect();
    Json(UseCasesResponse { use_cases })
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/use-cases", get(list_use_cases))
        .with_state(state)
}
