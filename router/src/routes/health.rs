use std::fmt::Write as _;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::service::StoreHealth;
use crate::AppState;

#[derive(Serialize)]
struct HealthResponse {
    /// "ok", or "degraded" while the session store is unreachable.
    status: &'static str,
    version: &'static str,
    session_store: StoreHealth,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let store = state.service.store_health().await;
    Json(HealthResponse {
        status: if store.reachable { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        session_store: store,
    })
}

/// Prometheus text exposition of the routing statistics.
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let s = state.service.stats().await;
    let mut body = String::new();

    let mut gauge = |name: &str, help: &str, value: f64| {
        let _ = writeln!(body, "# HELP turnstile_{name} {help}");
        let _ = writeln!(body, "# TYPE turnstile_{name} gauge");
        let _ = writeln!(body, "turnstile_{name} {value}");
    };
    gauge("requests_total", "Routed requests", s.total_requests as f64);
    gauge("requests_failed", "Requests whose dispatch failed", s.failed_requests as f64);
    gauge("requests_bypassed", "Requests routed from session state", s.bypassed_requests as f64);
    gauge("requests_degraded", "Requests routed without the store", s.degraded_requests as f64);
    gauge("bypass_rate", "Share of requests that skipped classification", s.bypass_rate);
    gauge("sessions_created", "Sessions created", s.sessions_created as f64);
    gauge("avg_routing_time_ms", "Moving average of routing time", s.avg_routing_time_ms);
    gauge("avg_inference_time_ms", "Moving average of backend time", s.avg_inference_time_ms);
    if let Some(active) = s.active_sessions {
        gauge("active_sessions", "Live sessions in the store", active as f64);
    }

    let _ = writeln!(body, "# HELP turnstile_use_case_requests Requests per use case");
    let _ = writeln!(body, "# TYPE turnstile_use_case_requests gauge");
    for (use_case, count) in &s.use_case_counts {
        let _ = writeln!(body, "turnstile_use_case_requests{{use_case=\"{use_case}\"}} {count}");
    }

    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}
