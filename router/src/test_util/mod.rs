//! Helpers shared by unit and integration tests.

pub mod mock_backend;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use turnstile_common::UseCase;

use crate::config::{default_backend, Config};
use crate::registry::BackendRegistry;
use crate::service::RoutingService;
use crate::session::{MemorySessionStore, Session, SessionStore, SessionStoreError};
use crate::stats::StatsAggregator;
use crate::AppState;

/// Config with every backend pointing at `backend_url`, fast retries and a
/// short dispatch timeout.
///
/// One mock server can serve all three adapters since their paths differ.
pub fn test_config(backend_url: &str) -> Config {
    let mut config = Config::default();
    for use_case in UseCase::ALL {
        let mut backend = default_backend(use_case);
        backend.base_url = backend_url.to_string();
        config.backends.insert(use_case, backend);
    }
    config.dispatch.timeout_secs = 5;
    config.dispatch.backoff_base_ms = 1;
    config.session.op_timeout_ms = 200;
    config.logging.level = "debug".to_string();
    config
}

pub fn create_test_state_with_store(config: Config, store: Arc<dyn SessionStore>) -> Arc<AppState> {
    let registry = Arc::new(BackendRegistry::from_config(&config).expect("valid test config"));
    let stats = Arc::new(StatsAggregator::new());
    let service = RoutingService::new(&config, registry, store, stats)
        .expect("failed to build HTTP client");
    Arc::new(AppState { service })
}

/// State backed by an in-memory session store.
pub fn create_test_state(backend_url: &str) -> Arc<AppState> {
    create_test_state_with_store(test_config(backend_url), Arc::new(MemorySessionStore::new()))
}

/// A store whose every operation fails, as if Redis were down.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnreachableSessionStore;

fn refused() -> SessionStoreError {
    SessionStoreError::Unavailable("connection refused".to_string())
}

#[async_trait]
impl SessionStore for UnreachableSessionStore {
    fn kind(&self) -> &'static str {
        "unreachable"
    }

    async fn get(&self, _id: &str) -> crate::session::Result<Option<Session>> {
        Err(refused())
    }

    async fn put(&self, _session: &Session, _ttl: Duration) -> crate::session::Result<()> {
        Err(refused())
    }

    async fn compare_and_swap(
        &self,
        _expected: Option<u64>,
        _session: &Session,
        _ttl: Duration,
    ) -> crate::session::Result<bool> {
        Err(refused())
    }

    async fn delete(&self, _id: &str) -> crate::session::Result<bool> {
        Err(refused())
    }

    async fn count(&self) -> crate::session::Result<usize> {
        Err(refused())
    }

    async fn ping(&self) -> crate::session::Result<()> {
        Err(refused())
    }
}

/// A store that never answers, to exercise store deadlines.
#[derive(Debug, Clone, Copy, Default)]
pub struct HangingSessionStore;

#[async_trait]
impl SessionStore for HangingSessionStore {
    fn kind(&self) -> &'static str {
        "hanging"
    }

    async fn get(&self, _id: &str) -> crate::session::Result<Option<Session>> {
        std::future::pending().await
    }

    async fn put(&self, _session: &Session, _ttl: Duration) -> crate::session::Result<()> {
        std::future::pending().await
    }

    async fn compare_and_swap(
        &self,
        _expected: Option<u64>,
        _session: &Session,
        _ttl: Duration,
    ) -> crate::session::Result<bool> {
        std::future::pending().await
    }

    async fn delete(&self, _id: &str) -> crate::session::Result<bool> {
        std::future::pending().await
    }

    async fn count(&self) -> crate::session::Result<usize> {
        std::future::pending().await
    }

    async fn ping(&self) -> crate::session::Result<()> {
        std::future::pending().await
    }
}
