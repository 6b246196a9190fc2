//! Redis-backed session store, shared by every router instance pointing at
//! the same server.
//!
//! Sessions are stored as JSON under `{prefix}{id}` with a millisecond
//! expiry. Conditional writes run as a Lua script so the revision check and
//! the write happen in one server-side step.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::OnceCell;

use super::{Result, Session, SessionStore, SessionStoreError};

/// ARGV[1] is the expected revision, or -1 for "no live session".
/// An unparseable record counts as absent.
const CAS_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
local expected = tonumber(ARGV[1])
if current then
    local ok, decoded = pcall(cjson.decode, current)
    if ok then
        if tonumber(decoded['revision']) ~= expected then
            return 0
        end
    elseif expected >= 0 then
        return 0
    end
elseif expected >= 0 then
    return 0
end
redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
return 1
"#;

const SCAN_BATCH: usize = 500;

#[derive(Clone)]
pub struct RedisSessionStore {
    client: Arc<redis::Client>,
    /// One reconnecting connection shared by every operation and clone.
    conn: Arc<OnceCell<ConnectionManager>>,
    key_prefix: String,
    cas: Arc<redis::Script>,
}

impl std::fmt::Debug for RedisSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSessionStore")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisSessionStore {
    /// Open a client. The connection is established by the first operation
    /// and then reused, so a router can start while Redis is down and run
    /// degraded until it comes up.
    pub fn new(redis_url: &str, key_prefix: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| {
            SessionStoreError::Unavailable(format!("invalid Redis URL: {e}"))
        })?;
        Ok(Self {
            client: Arc::new(client),
            conn: Arc::new(OnceCell::new()),
            key_prefix: key_prefix.to_string(),
            cas: Arc::new(redis::Script::new(CAS_SCRIPT)),
        })
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.key_prefix, id)
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let manager = self
            .conn
            .get_or_try_init(|| ConnectionManager::new(self.client.as_ref().clone()))
            .await
            .map_err(|e| SessionStoreError::Unavailable(format!("failed to connect: {e}")))?;
        Ok(manager.clone())
    }
}

fn op_error(op: &str, e: redis::RedisError) -> SessionStoreError {
    SessionStoreError::Unavailable(format!("{op} failed: {e}"))
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    fn kind(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, id: &str) -> Result<Option<Session>> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn
            .get(self.key(id))
            .await
            .map_err(|e| op_error("GET", e))?;

        match raw {
            None => Ok(None),
            Some(json) => match serde_json::from_str(&json) {
                Ok(session) => Ok(Some(session)),
                Err(e) => {
                    // Overwritten by the next create, see CAS_SCRIPT.
                    tracing::warn!(
                        session_id = %id,
                        error = %e,
                        "Ignoring corrupt session record"
                    );
                    Ok(None)
                }
            },
        }
    }

    async fn put(&self, session: &Session, ttl: Duration) -> Result<()> {
        let json = serde_json::to_string(session)
            .map_err(|e| SessionStoreError::Corrupt(e.to_string()))?;
        let mut conn = self.connection().await?;
        let _: () = conn
            .pset_ex(self.key(&session.id), json, ttl.as_millis().max(1) as u64)
            .await
            .map_err(|e| op_error("SET PX", e))?;
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        expected: Option<u64>,
        session: &Session,
        ttl: Duration,
    ) -> Result<bool> {
        let json = serde_json::to_string(session)
            .map_err(|e| SessionStoreError::Corrupt(e.to_string()))?;
        let expected = expected.map_or(-1, |rev| rev as i64);
        let ttl_ms = ttl.as_millis().max(1) as u64;

        let mut conn = self.connection().await?;
        let written: i64 = self
            .cas
            .key(self.key(&session.id))
            .arg(expected)
            .arg(json)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| op_error("CAS script", e))?;

        Ok(written == 1)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let removed: i64 = conn
            .del(self.key(id))
            .await
            .map_err(|e| op_error("DEL", e))?;
        Ok(removed > 0)
    }

    async fn count(&self) -> Result<usize> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", self.key_prefix);
        let mut cursor: u64 = 0;
        let mut total = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| op_error("SCAN", e))?;
            total += keys.len();
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(total)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| op_error("PING", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::with_deadline;
    use chrono::Utc;
    use redis::AsyncCommands;
    use turnstile_common::UseCase;

    #[test]
    fn test_invalid_url_rejected() {
        assert!(matches!(
            RedisSessionStore::new("not a url", "session:"),
            Err(SessionStoreError::Unavailable(_))
        ));
    }

    #[test]
    fn test_key_prefix() {
        let store = RedisSessionStore::new("redis://127.0.0.1:6379", "session:").unwrap();
        assert_eq!(store.key("abc"), "session:abc");
    }

    #[tokio::test]
    async fn test_unreachable_server_reports_unavailable() {
        // Nothing listens on port 1.
        let store = RedisSessionStore::new("redis://127.0.0.1:1", "session:").unwrap();
        let session = Session::new(
            "a",
            UseCase::Agent,
            "minicpm-v-4",
            0.5,
            Duration::from_secs(60),
            Utc::now(),
        );
        // The connection manager retries its first connect, so bound each
        // call the way the router does.
        let deadline = Duration::from_millis(500);
        assert!(matches!(
            with_deadline(deadline, store.ping()).await,
            Err(SessionStoreError::Unavailable(_) | SessionStoreError::Timeout)
        ));
        assert!(with_deadline(deadline, store.get("a")).await.is_err());
        let ttl = Duration::from_secs(60);
        assert!(with_deadline(deadline, store.compare_and_swap(None, &session, ttl))
            .await
            .is_err());
    }

    // The tests below need a live server and are skipped unless REDIS_URL is
    // set. Each one works under its own key prefix.

    const TTL: Duration = Duration::from_secs(30);

    fn live_store() -> Option<RedisSessionStore> {
        let url = std::env::var("REDIS_URL").ok()?;
        let prefix = format!("turnstile-test:{}:", uuid::Uuid::new_v4());
        Some(RedisSessionStore::new(&url, &prefix).expect("REDIS_URL must be a valid URL"))
    }

    fn session(id: &str) -> Session {
        Session::new(id, UseCase::Agent, "minicpm-v-4", 0.6, TTL, Utc::now())
    }

    #[tokio::test]
    async fn test_live_create_happens_once() {
        let Some(store) = live_store() else { return };
        assert!(store.compare_and_swap(None, &session("a"), TTL).await.unwrap());
        assert!(!store.compare_and_swap(None, &session("a"), TTL).await.unwrap());

        let stored = store.get("a").await.unwrap().unwrap();
        assert_eq!(stored.revision, 0);
        assert_eq!(stored.use_case, UseCase::Agent);
        store.delete("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_live_stale_revision_loses() {
        let Some(store) = live_store() else { return };
        let s = session("a");
        store.compare_and_swap(None, &s, TTL).await.unwrap();
        let next = s.touched(Utc::now());
        assert!(store.compare_and_swap(Some(0), &next, TTL).await.unwrap());
        // Another instance still holding revision 0.
        let stale = s.reassigned(UseCase::Video, "minicpm-v-4", 1.0, Utc::now());
        assert!(!store.compare_and_swap(Some(0), &stale, TTL).await.unwrap());

        let stored = store.get("a").await.unwrap().unwrap();
        assert_eq!(stored.revision, 1);
        assert_eq!(stored.use_case, UseCase::Agent);
        assert!(!store.compare_and_swap(Some(3), &session("b"), TTL).await.unwrap());
        store.delete("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_live_corrupt_record_is_replaced_on_create() {
        let Some(store) = live_store() else { return };
        let mut conn = store.connection().await.unwrap();
        let _: () = conn.set(store.key("a"), "not json").await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), None);
        assert!(!store.compare_and_swap(Some(0), &session("a"), TTL).await.unwrap());
        assert!(store.compare_and_swap(None, &session("a"), TTL).await.unwrap());
        assert_eq!(store.get("a").await.unwrap().unwrap().revision, 0);
        store.delete("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_live_session_expires() {
        let Some(store) = live_store() else { return };
        let short = Duration::from_millis(100);
        store.compare_and_swap(None, &session("a"), short).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.compare_and_swap(None, &session("a"), TTL).await.unwrap());
        store.delete("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_live_put_count_and_delete() {
        let Some(store) = live_store() else { return };
        store.ping().await.unwrap();
        store.put(&session("a"), TTL).await.unwrap();
        store.put(&session("b"), TTL).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.get("a").await.unwrap(), None);
        store.delete("b").await.unwrap();
    }

    #[tokio::test]
    async fn test_live_clones_share_connection() {
        let Some(store) = live_store() else { return };
        let clone = store.clone();
        store.ping().await.unwrap();
        clone.ping().await.unwrap();
        assert!(Arc::ptr_eq(&store.conn, &clone.conn));
        assert!(store.conn.initialized());
    }
}
