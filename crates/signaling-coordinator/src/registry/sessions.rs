//! `SessionRegistry` - live sessions and the resources each one owns.
//!
//! Each session's owned sets are the authoritative scope of its teardown:
//! disconnect reads these sets and nothing else.

use crate::errors::ScError;
use crate::types::{ProducerId, SessionId, TransportId};

use std::collections::{HashMap, HashSet};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting new resources.
    Open,
    /// Teardown in progress; attaches are refused.
    Closing,
}

/// One connected client.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub state: SessionState,
    pub transports: HashSet<TransportId>,
    pub producers: HashSet<ProducerId>,
    /// Unix seconds at open.
    pub opened_at: i64,
}

/// Owned sets left on a session at the moment it was removed.
///
/// Empty after a clean teardown; anything here is a leak worth logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleasedSession {
    pub id: SessionId,
    pub transports: Vec<TransportId>,
    pub producers: Vec<ProducerId>,
}

impl ReleasedSession {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transports.is_empty() && self.producers.is_empty()
    }
}

/// Registry of live sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session.
    ///
    /// # Errors
    ///
    /// Returns `ScError::Conflict` if the id is already registered.
    pub fn open(&mut self, id: SessionId) -> Result<SessionId, ScError> {
        if self.sessions.contains_key(&id) {
            return Err(ScError::Conflict("Session already exists".to_string()));
        }
        self.sessions.insert(
            id,
            Session {
                id,
                state: SessionState::Open,
                transports: HashSet::new(),
                producers: HashSet::new(),
                opened_at: chrono::Utc::now().timestamp(),
            },
        );
        Ok(id)
    }

    /// Mark a session as closing and return the transports it owns.
    ///
    /// Returns `None` if the session is unknown or already closing, so that
    /// only the first teardown does any work.
    pub fn begin_close(&mut self, id: &SessionId) -> Option<Vec<TransportId>> {
        let session = self.sessions.get_mut(id)?;
        if session.state == SessionState::Closing {
            return None;
        }
        session.state = SessionState::Closing;
        Some(session.transports.iter().copied().collect())
    }

    /// Remove a session, returning whatever it still owned.
    pub fn close(&mut self, id: &SessionId) -> Option<ReleasedSession> {
        let session = self.sessions.remove(id)?;
        Some(ReleasedSession {
            id: session.id,
            transports: session.transports.into_iter().collect(),
            producers: session.producers.into_iter().collect(),
        })
    }

    /// Look up a session.
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Whether the session exists and is still accepting resources.
    #[must_use]
    pub fn is_open(&self, id: &SessionId) -> bool {
        self.sessions
            .get(id)
            .is_some_and(|s| s.state == SessionState::Open)
    }

    fn open_session_mut(&mut self, id: &SessionId) -> Result<&mut Session, ScError> {
        match self.sessions.get_mut(id) {
            Some(session) if session.state == SessionState::Open => Ok(session),
            _ => Err(ScError::UnknownSession(id.to_string())),
        }
    }

    /// Record a transport as owned by a session.
    ///
    /// # Errors
    ///
    /// Returns `ScError::UnknownSession` if the session is gone or closing.
    pub fn attach_transport(
        &mut self,
        session_id: &SessionId,
        transport_id: TransportId,
    ) -> Result<(), ScError> {
        self.open_session_mut(session_id)?
            .transports
            .insert(transport_id);
        Ok(())
    }

    /// Record a producer as owned by a session.
    ///
    /// # Errors
    ///
    /// Returns `ScError::UnknownSession` if the session is gone or closing.
    pub fn attach_producer(
        &mut self,
        session_id: &SessionId,
        producer_id: ProducerId,
    ) -> Result<(), ScError> {
        self.open_session_mut(session_id)?
            .producers
            .insert(producer_id);
        Ok(())
    }

    /// Drop a transport from a session's owned set. Works while closing.
    pub fn detach_transport(&mut self, session_id: &SessionId, transport_id: &TransportId) -> bool {
        self.sessions
            .get_mut(session_id)
            .is_some_and(|s| s.transports.remove(transport_id))
    }

    /// Drop a producer from a session's owned set. Works while closing.
    pub fn detach_producer(&mut self, session_id: &SessionId, producer_id: &ProducerId) -> bool {
        self.sessions
            .get_mut(session_id)
            .is_some_and(|s| s.producers.remove(producer_id))
    }

    /// Whether `session_id` owns `transport_id`.
    #[must_use]
    pub fn owns_transport(&self, session_id: &SessionId, transport_id: &TransportId) -> bool {
        self.sessions
            .get(session_id)
            .is_some_and(|s| s.transports.contains(transport_id))
    }

    /// Number of registered sessions, closing ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
