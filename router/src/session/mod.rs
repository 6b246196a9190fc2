//! Session records and the stores that hold them.
//!
//! A session remembers which use case and backend a conversation was routed
//! to, so later turns can skip classification. Every write is a
//! compare-and-swap on [`Session::revision`], which keeps the
//! read-decide-write step per session atomic across concurrent requests and
//! across router instances sharing a Redis store.

mod memory;
mod redis_store;

pub use self::memory::MemorySessionStore;
pub use self::redis_store::RedisSessionStore;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use turnstile_common::{SessionSummary, UseCase};

/// Longest session id a client may supply.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Routing state for one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub use_case: UseCase,
    pub backend: String,
    /// Confidence of the classification that last set `use_case`.
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub turn_count: u64,
    pub ttl_secs: u64,
    /// Bumped on every write; the compare-and-swap token.
    pub revision: u64,
}

impl Session {
    /// A session created by the request that is its first turn.
    pub fn new(
        id: impl Into<String>,
        use_case: UseCase,
        backend: impl Into<String>,
        confidence: f64,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            use_case,
            backend: backend.into(),
            confidence,
            created_at: now,
            last_used_at: now,
            turn_count: 1,
            ttl_secs: ttl.as_secs(),
            revision: 0,
        }
    }

    /// The next revision of this session after another turn on the same
    /// assignment.
    pub fn touched(&self, now: DateTime<Utc>) -> Self {
        Self {
            last_used_at: now,
            turn_count: self.turn_count.saturating_add(1),
            revision: self.revision + 1,
            ..self.clone()
        }
    }

    /// The next revision of this session after a fresh classification.
    ///
    /// The turn counter restarts, so a session that hit the turn limit can be
    /// bypassed again under its new assignment.
    pub fn reassigned(
        &self,
        use_case: UseCase,
        backend: impl Into<String>,
        confidence: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            use_case,
            backend: backend.into(),
            confidence,
            last_used_at: now,
            turn_count: 1,
            revision: self.revision + 1,
            ..self.clone()
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            use_case: self.use_case,
            backend: self.backend.clone(),
            confidence: self.confidence,
            turn_count: self.turn_count,
            created_at: self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            last_used_at: self.last_used_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            ttl_secs: self.ttl_secs,
        }
    }
}

/// Validate a client-supplied session id.
pub fn validate_session_id(id: &str) -> std::result::Result<(), String> {
    if id.trim().is_empty() {
        return Err("session_id must not be empty".to_string());
    }
    let len = id.chars().count();
    if len > MAX_SESSION_ID_LEN {
        return Err(format!(
            "session_id must be at most {MAX_SESSION_ID_LEN} characters, got {len}"
        ));
    }
    if id.chars().any(char::is_control) {
        return Err("session_id must not contain control characters".to_string());
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("store unreachable: {0}")]
    Unavailable(String),
    #[error("store operation timed out")]
    Timeout,
    #[error("corrupt session record: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, SessionStoreError>;

/// Storage backend for sessions.
///
/// Expired sessions must be indistinguishable from absent ones on every
/// operation.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Short name for logs and health output.
    fn kind(&self) -> &'static str;

    async fn get(&self, id: &str) -> Result<Option<Session>>;

    /// Unconditional write with a fresh TTL, for seeding or restoring
    /// sessions outside the request path. Routing writes only through
    /// [`compare_and_swap`](Self::compare_and_swap).
    async fn put(&self, session: &Session, ttl: Duration) -> Result<()>;

    /// Write `session` with a fresh TTL if the stored revision still equals
    /// `expected` (`None` meaning no live session). Returns `false` when
    /// another writer got there first.
    async fn compare_and_swap(
        &self,
        expected: Option<u64>,
        session: &Session,
        ttl: Duration,
    ) -> Result<bool>;

    /// Returns whether a live session was removed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Number of live sessions.
    async fn count(&self) -> Result<usize>;

    async fn ping(&self) -> Result<()>;
}

/// Run a store operation under a deadline.
pub async fn with_deadline<T, F>(deadline: Duration, op: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, op).await {
        Ok(result) => result,
        Err(_) => Err(SessionStoreError::Timeout),
    }
}
