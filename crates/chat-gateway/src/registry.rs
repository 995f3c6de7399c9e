//! Session registry: one live session per user

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::queue::Enqueued;
use crate::session::{CloseReason, Session};

/// Maps user id to that user's current session
///
/// All mutation happens under the write lock. Closing a superseded session is
/// left to the caller so no I/O ever happens while the lock is held.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `session` the current one for its user.
    ///
    /// Returns the session it replaced, if any. The caller must close it.
    pub fn register(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        let user_id = session.user_id.clone();
        let previous = self.sessions.write().insert(user_id, session.clone());
        info!(
            user_id = %session.user_id,
            connection_id = %session.connection_id,
            superseded = previous.is_some(),
            "Session registered"
        );
        previous
    }

    /// Remove `session` if it is still the current one for `user_id`.
    ///
    /// Returns false when a newer session has taken its place, which leaves
    /// that newer session untouched.
    pub fn unregister(&self, user_id: &str, session: &Arc<Session>) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get(user_id) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(user_id);
                info!(user_id, connection_id = %session.connection_id, "Session unregistered");
                true
            }
            _ => false,
        }
    }

    /// Current session for a user
    pub fn lookup(&self, user_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(user_id).cloned()
    }

    /// Point-in-time copy of every registered session
    pub fn list_all(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Enqueue onto the user's session only if it is still the connection
    /// identified by `connection_id`.
    ///
    /// The read lock is held across the push so the session cannot be swapped
    /// out underneath it. Returns `None` when that connection is not current.
    pub fn deliver_to(&self, user_id: &str, connection_id: &str, payload: String) -> Option<Enqueued> {
        let sessions = self.sessions.read();
        let session = sessions.get(user_id)?;
        if session.connection_id != connection_id {
            return None;
        }
        Some(session.enqueue(payload))
    }

    /// Registered user ids
    pub fn user_ids(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Get total session count
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Close every registered session, e.g. on shutdown
    pub fn close_all(&self, reason: CloseReason) {
        for session in self.list_all() {
            session.close(reason);
        }
    }
}
