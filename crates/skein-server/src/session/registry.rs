//! Concurrent id → session map.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::{counter, gauge};
use skein_core::{CloseStatus, SessionId, TransportError};
use tracing::{debug, info, warn};

use super::Session;
use super::scheduler::SweepTarget;
use crate::metrics::{HEARTBEATS_TOTAL, SESSIONS_ACTIVE, SESSIONS_EVICTED_TOTAL};

/// Live sessions of one mount.
///
/// Get-or-create is atomic per id: concurrent first requests for the same
/// id all end up with the same [`Session`].
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a session.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Return the session for `id`, creating it with `create` if absent.
    ///
    /// The flag is `true` when this call created the session.
    pub fn get_or_create(
        &self,
        id: &str,
        create: impl FnOnce() -> Arc<Session>,
    ) -> (Arc<Session>, bool) {
        match self.sessions.entry(SessionId::from(id)) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let session = create();
                let _ = entry.insert(Arc::clone(&session));
                gauge!(SESSIONS_ACTIVE).increment(1.0);
                debug!(session_id = id, "session created");
                (session, true)
            }
        }
    }

    /// Remove a session by id.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(id).map(|(_, session)| session);
        if removed.is_some() {
            gauge!(SESSIONS_ACTIVE).decrement(1.0);
        }
        removed
    }

    /// Remove `session` only if it is still the instance registered under
    /// its id.
    pub fn remove_exact(&self, session: &Arc<Session>) -> bool {
        let removed = self
            .sessions
            .remove_if(session.id().as_str(), |_, current| Arc::ptr_eq(current, session))
            .is_some();
        if removed {
            gauge!(SESSIONS_ACTIVE).decrement(1.0);
        }
        removed
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Ids of every registered session.
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Remove and close every session.
    pub async fn close_all(&self, status: CloseStatus) {
        for id in self.ids() {
            if let Some(session) = self.remove(id.as_str()) {
                if let Err(e) = session.close(status.clone()).await {
                    warn!(session_id = %id, error = %e, "failed to close session");
                }
            }
        }
    }
}

#[async_trait]
impl SweepTarget for SessionRegistry {
    fn heartbeat_idle(&self, interval: Duration) -> usize {
        let sent = self
            .sessions
            .iter()
            .filter(|entry| entry.value().heartbeat_if_idle(interval))
            .count();
        if sent > 0 {
            counter!(HEARTBEATS_TOTAL).increment(sent as u64);
        }
        sent
    }

    fn expired(&self, delay: Duration) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().time_since_last_active() > delay)
            .map(|entry| entry.key().clone())
            .collect()
    }

    async fn evict(&self, id: &SessionId, delay: Duration) -> Result<bool, TransportError> {
        // re-checked under the shard lock: the client may have come back
        let Some((_, session)) = self
            .sessions
            .remove_if(id.as_str(), |_, s| s.time_since_last_active() > delay)
        else {
            return Ok(false);
        };
        gauge!(SESSIONS_ACTIVE).decrement(1.0);
        counter!(SESSIONS_EVICTED_TOTAL).increment(1);
        info!(session_id = %id, "evicting idle session");
        session.close(CloseStatus::NORMAL).await?;
        Ok(true)
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
