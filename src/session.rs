//! Session store
//!
//! Represents active two-party chat sessions and their timing metadata.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::error::StateError;
use crate::types::{ConnectionId, SessionId};

/// One pairing between exactly two distinct connections
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    /// The connection whose search created the session
    pub a: ConnectionId,
    /// The waiter it was matched with
    pub b: ConnectionId,
    pub started_at: DateTime<Utc>,
    /// Set once, when the session is closed
    pub ended_at: Option<DateTime<Utc>>,
    /// Whole seconds between start and close
    pub duration_seconds: Option<u64>,
    started: Instant,
}

impl Session {
    fn new(a: ConnectionId, b: ConnectionId) -> Self {
        let started_at = Utc::now();
        Self {
            id: SessionId::derive(a, b, started_at),
            a,
            b,
            started_at,
            ended_at: None,
            duration_seconds: None,
            started: Instant::now(),
        }
    }

    /// Get the other participant
    ///
    /// Returns None if `id` is not a participant.
    pub fn partner_of(&self, id: ConnectionId) -> Option<ConnectionId> {
        if self.a == id {
            Some(self.b)
        } else if self.b == id {
            Some(self.a)
        } else {
            None
        }
    }

    pub fn participants(&self) -> [ConnectionId; 2] {
        [self.a, self.b]
    }
}

/// Active sessions keyed by id
///
/// Closed sessions leave the store; a second close finds nothing.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<SessionId, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session between two distinct connections
    pub fn create(&mut self, a: ConnectionId, b: ConnectionId) -> Result<&Session, StateError> {
        debug_assert_ne!(a, b, "session participants must differ");
        if a == b {
            return Err(StateError::SelfPairing(a));
        }

        let session = Session::new(a, b);
        let id = session.id.clone();
        self.sessions.insert(id.clone(), session);
        Ok(&self.sessions[&id])
    }

    /// Close a session, returning the record with its end time and duration
    ///
    /// Unknown or already-closed sessions return `None`.
    pub fn close(&mut self, id: &SessionId) -> Option<Session> {
        self.close_at(id, Instant::now())
    }

    fn close_at(&mut self, id: &SessionId, now: Instant) -> Option<Session> {
        let mut session = self.sessions.remove(id)?;
        session.ended_at = Some(Utc::now());
        session.duration_seconds = Some(now.saturating_duration_since(session.started).as_secs());
        Some(session)
    }

    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Number of open sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
