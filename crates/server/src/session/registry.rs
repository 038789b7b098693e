//! Session registry: the single source of truth mapping session identifiers
//! to live sessions for one control connection.
//!
//! Backed by a `DashMap` so insert, lookup, and removal are atomic per entry;
//! a frame-routing lookup can never observe a partially registered or
//! partially removed session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use protocol::SessionId;
use uuid::Uuid;

use crate::inventory::Target;
use crate::session::remote::{RemoteSession, SessionCommands};

/// Registry of live sessions for one control connection.
///
/// The registry owns the only long-lived handles to its sessions; when the
/// owning channel goes away, [`close_all`] guarantees no session outlives it.
///
/// [`close_all`]: SessionRegistry::close_all
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<RemoteSession>>,
    /// Latched by `close_all`; registrations racing the channel teardown are
    /// cancelled on the spot instead of outliving it.
    draining: AtomicBool,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            draining: AtomicBool::new(false),
        }
    }

    /// Create and track a session bound to `target`.
    ///
    /// Generates a fresh identifier, unique for the channel's lifetime, and
    /// returns the handle together with the command receiver its driver task
    /// consumes.
    pub fn register(&self, target: Target) -> (Arc<RemoteSession>, SessionCommands) {
        let id = Uuid::new_v4().to_string();
        let (session, commands) = RemoteSession::new(id, target);
        self.sessions
            .insert(session.id().clone(), Arc::clone(&session));

        if self.draining.load(Ordering::SeqCst) {
            self.unregister(session.id());
        } else {
            tracing::debug!(
                session_id = %session.id(),
                target = %session.target().target_id,
                "Registered session"
            );
        }

        (session, commands)
    }

    /// Look up a live session by identifier.
    pub fn lookup(&self, session_id: &SessionId) -> Option<Arc<RemoteSession>> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Remove an entry without triggering teardown.
    ///
    /// Used by a session's driver as its final act, synchronously with
    /// teardown, so no stale handle can be reused.
    pub(crate) fn remove(&self, session_id: &SessionId) {
        if self.sessions.remove(session_id).is_some() {
            tracing::debug!(session_id = %session_id, "Removed session");
        }
    }

    /// Remove a session and trigger its teardown.
    ///
    /// Returns whether the session was present; calling again for the same
    /// identifier is a no-op.
    pub fn unregister(&self, session_id: &SessionId) -> bool {
        match self.sessions.remove(session_id) {
            Some((_, session)) => {
                session.close();
                tracing::info!(session_id = %session_id, "Unregistered session");
                true
            }
            None => false,
        }
    }

    /// Close every registered session. Called when the owning channel
    /// terminates; the registry is empty afterwards, and any registration
    /// still in flight is cancelled as it lands.
    pub fn close_all(&self) -> usize {
        self.draining.store(true, Ordering::SeqCst);
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let mut closed = 0;
        for id in ids {
            if self.unregister(&id) {
                closed += 1;
            }
        }

        if closed > 0 {
            tracing::info!(count = closed, "Closed all sessions for channel");
        }
        closed
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the registry has no live sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
