use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::codec::FrameCodec;

use super::Session;

/// Concurrent map of live sessions keyed by session id.
///
/// The only structure in the engine mutated by multiple logical flows at
/// once (accept loop, per-session closed hooks, broadcast readers), so it
/// must be safe to add/remove/iterate without any caller-side locking.
/// Iteration is weakly consistent: it may observe adds and removes made
/// while it runs.
pub struct SessionRegistry<C: FrameCodec> {
    sessions: DashMap<Uuid, Arc<Session<C>>>,
}

impl<C: FrameCodec> SessionRegistry<C> {
    pub fn new() -> SessionRegistry<C> {
        SessionRegistry {
            sessions: DashMap::new(),
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Insert-if-absent. `false` means an entry with the same id already
    /// exists; with random ids that should not happen, but callers must
    /// dispose the rejected session instead of starting it.
    pub fn add(&self, session: Arc<Session<C>>) -> bool {
        let id = session.id();
        match self.sessions.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(session);
                true
            }
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<Session<C>>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Removes and closes the session in one logical operation, so a session
    /// can never linger registered-but-dead. Returns the removed session.
    pub async fn remove(&self, id: &Uuid) -> Option<Arc<Session<C>>> {
        let (_, session) = self.sessions.remove(id)?;
        session.close().await;
        Some(session)
    }

    /// Snapshot of the currently registered sessions.
    pub fn sessions(&self) -> Vec<Arc<Session<C>>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Closes and removes every session. Used on full server shutdown.
    pub async fn clear(&self) {
        let ids: Vec<Uuid> = self.sessions.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, session)) = self.sessions.remove(&id) {
                session.close().await;
            }
        }
        debug!("session registry cleared");
    }
}

impl<C: FrameCodec> Default for SessionRegistry<C> {
    fn default() -> Self {
        SessionRegistry::new()
    }
}
