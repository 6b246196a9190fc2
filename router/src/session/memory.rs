//! In-process session store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{Result, Session, SessionStore};

#[derive(Debug, Clone)]
struct Slot {
    session: Session,
    expires_at: Instant,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Sessions held in a concurrent map.
///
/// Expiry is checked on every access; [`MemorySessionStore::spawn_sweeper`]
/// reclaims the memory of sessions nobody asks about again.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    slots: DashMap<String, Slot>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired session. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.is_live(now));
        before.saturating_sub(self.slots.len())
    }

    /// Periodically purge expired sessions until the task is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let purged = self.purge_expired();
                if purged > 0 {
                    tracing::debug!(
                        purged,
                        remaining = self.slots.len(),
                        "Purged expired sessions"
                    );
                }
            }
        })
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, id: &str) -> Result<Option<Session>> {
        let now = Instant::now();
        if let Some(slot) = self.slots.get(id) {
            if slot.is_live(now) {
                return Ok(Some(slot.session.clone()));
            }
        }
        // The read guard is released above; only remove if still expired.
        self.slots.remove_if(id, |_, slot| !slot.is_live(now));
        Ok(None)
    }

    async fn put(&self, session: &Session, ttl: Duration) -> Result<()> {
        let slot = Slot {
            session: session.clone(),
            expires_at: Instant::now() + ttl,
        };
        self.slots.insert(session.id.clone(), slot);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        expected: Option<u64>,
        session: &Session,
        ttl: Duration,
    ) -> Result<bool> {
        let now = Instant::now();
        let slot = Slot {
            session: session.clone(),
            expires_at: now + ttl,
        };
        match self.slots.entry(session.id.clone()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied
                    .get()
                    .is_live(now)
                    .then(|| occupied.get().session.revision);
                if current != expected {
                    return Ok(false);
                }
                occupied.insert(slot);
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return Ok(false);
                }
                vacant.insert(slot);
            }
        }
        Ok(true)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .slots
            .remove(id)
            .is_some_and(|(_, slot)| slot.is_live(now)))
    }

    async fn count(&self) -> Result<usize> {
        let now = Instant::now();
        Ok(self.slots.iter().filter(|slot| slot.is_live(now)).count())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
