//! Expiring session table shared by the stateful strategies.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use fabric_common::AuthError;

use super::SessionId;

/// Default lifetime of a session.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug)]
struct Entry<T> {
    value: T,
    expires_at: Instant,
}

/// Open sessions, each with a deadline.
///
/// Expired sessions are dropped when they are next looked up and swept on
/// every login, so the table never outgrows the sessions opened within one
/// TTL.
#[derive(Debug)]
pub struct SessionStore<T> {
    ttl: Duration,
    sessions: DashMap<SessionId, Entry<T>>,
}

impl<T> SessionStore<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: DashMap::new(),
        }
    }

    pub const fn set_ttl(&mut self, ttl: Duration) {
        self.ttl = ttl;
    }

    /// Open a session that lives for the TTL, or until `expires_at` if that
    /// comes first.
    pub fn open(&self, value: T, expires_at: Option<Instant>) -> SessionId {
        self.evict_expired();

        let deadline = Instant::now() + self.ttl;
        let expires_at = expires_at.map_or(deadline, |at| at.min(deadline));
        let session = SessionId::generate();
        self.sessions
            .insert(session.clone(), Entry { value, expires_at });
        session
    }

    /// Run `f` against a live session.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnknownSession`] for sessions that were never
    /// opened, were closed, or have expired.
    pub fn with<R>(&self, session: &SessionId, f: impl FnOnce(&T) -> R) -> Result<R, AuthError> {
        let entry = self.sessions.get(session).ok_or(AuthError::UnknownSession)?;
        if entry.expires_at > Instant::now() {
            return Ok(f(&entry.value));
        }
        drop(entry);

        self.sessions.remove(session);
        tracing::debug!("Session expired");
        Err(AuthError::UnknownSession)
    }

    /// Close a session. Returns true if it was open.
    pub fn close(&self, session: &SessionId) -> bool {
        self.sessions.remove(session).is_some()
    }

    fn evict_expired(&self) {
        let now = Instant::now();
        self.sessions.retain(|_, entry| entry.expires_at > now);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}
