use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use turnstile_router::config::{Config, SessionStoreKind};
use turnstile_router::session::with_deadline;
use turnstile_router::{
    app, logging, AppState, BackendRegistry, MemorySessionStore, RedisSessionStore,
    RoutingService, SessionStore, StatsAggregator,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    logging::init(&config.logging.level);

    tracing::info!("Starting turnstile router v{}", env!("CARGO_PKG_VERSION"));

    let registry = Arc::new(BackendRegistry::from_config(&config)?);
    for (use_case, backend) in registry.entries() {
        tracing::info!(
            use_case = %use_case,
            backend = %backend.name,
            url = %backend.base_url,
            adapter = backend.adapter.as_str(),
            "Registered backend"
        );
    }

    let store: Arc<dyn SessionStore> = match config.session.store {
        SessionStoreKind::Memory => {
            let store = Arc::new(MemorySessionStore::new());
            store
                .clone()
                .spawn_sweeper(Duration::from_secs(config.session.sweep_interval_secs.max(1)));
            tracing::info!("Using in-memory session store");
            store
        }
        SessionStoreKind::Redis => {
            let store =
                RedisSessionStore::new(&config.session.redis_url, &config.session.key_prefix)?;
            if let Err(e) = with_deadline(config.session.op_timeout(), store.ping()).await {
                // Requests route without sessions until Redis comes back.
                tracing::warn!(error = %e, "Redis unreachable at startup");
            }
            tracing::info!(url = %config.session.redis_url, "Using Redis session store");
            Arc::new(store)
        }
    };

    let stats = Arc::new(StatsAggregator::new());
    let service = RoutingService::new(&config, registry, store, stats)?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState { service });

    tracing::info!("Listening on {}", addr);
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app(state)).await?;

    Ok(())
}
