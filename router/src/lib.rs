pub mod bypass;
pub mod classifier;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod registry;
pub mod routes;
pub mod service;
pub mod session;
pub mod stats;
pub mod test_util;

pub use classifier::{Classification, ClassificationInput, Classifier, KeywordClassifier};
pub use config::{Config, SessionStoreKind};
pub use error::Error;
pub use registry::{Backend, BackendRegistry};
pub use service::RoutingService;
pub use session::{MemorySessionStore, RedisSessionStore, Session, SessionStore};
pub use stats::{StatsAggregator, StatsSnapshot};

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state.
pub struct AppState {
    pub service: RoutingService,
}

/// All HTTP routes with logging and CORS layers applied.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::route::router(state.clone()))
        .merge(routes::sessions::router(state.clone()))
        .merge(routes::stats::router(state.clone()))
        .merge(routes::use_cases::router(state.clone()))
        .merge(routes::health::router(state))
        .layer(axum::middleware::from_fn(logging::request_logger))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
