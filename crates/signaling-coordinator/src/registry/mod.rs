//! Session and resource bookkeeping.
//!
//! [`Registry`] pairs the [`SessionRegistry`] with the [`ResourceStore`] so
//! that every mutation touching both lands in one step. It is a plain,
//! synchronous struct; the registry actor owns the only instance and
//! serializes access through its mailbox.
//!
//! # Modules
//!
//! - [`sessions`] - Live sessions and their owned sets
//! - [`store`] - Transport/producer maps and the reverse index

pub mod sessions;
pub mod store;

use crate::engine::params::RtpParameters;
use crate::engine::{EngineProducer, EngineTransport};
use crate::errors::ScError;
use crate::types::{ProducerId, ProducerState, SessionId, SessionPhase, TransportId, TransportState};

pub use sessions::{ReleasedSession, Session, SessionRegistry, SessionState};
pub use store::{Producer, RemovedTransport, ResourceStore, Transport};

use std::collections::{HashSet, VecDeque};

/// Engine closures remembered for ids the registry has not committed yet.
pub const MAX_ENGINE_CLOSURES: usize = 4096;

/// One transport to close during teardown, with the producers it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportTeardown {
    pub transport_id: TransportId,
    pub producers: Vec<ProducerId>,
}

/// Resources a teardown must close, read from the session's owned set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownPlan {
    pub session_id: SessionId,
    pub transports: Vec<TransportTeardown>,
}

impl TeardownPlan {
    /// Total number of resources in the plan.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.transports
            .iter()
            .map(|t| 1 + t.producers.len())
            .sum()
    }
}

/// Point-in-time view of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub phase: SessionPhase,
    pub transports: Vec<TransportId>,
    pub producers: Vec<ProducerId>,
}

/// Aggregate counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStatus {
    pub sessions: usize,
    pub transports: usize,
    pub producers: usize,
}

/// Every transport and producer id the registry holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceIds {
    pub transports: Vec<TransportId>,
    pub producers: Vec<ProducerId>,
}

/// Ids the engine reported closed before their create was committed.
///
/// Engine ids are never reused, so the oldest entries are evicted once the
/// set is full.
#[derive(Debug)]
struct EngineClosures<T> {
    ids: HashSet<T>,
    order: VecDeque<T>,
}

impl<T> Default for EngineClosures<T> {
    fn default() -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
        }
    }
}

impl<T: Copy + Eq + std::hash::Hash> EngineClosures<T> {
    fn record(&mut self, id: T) {
        if !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > MAX_ENGINE_CLOSURES {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
    }

    fn take(&mut self, id: &T) -> bool {
        if !self.ids.remove(id) {
            return false;
        }
        self.order.retain(|queued| queued != id);
        true
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

/// Sessions plus the resources they own.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: SessionRegistry,
    store: ResourceStore,
    closed_transports: EngineClosures<TransportId>,
    closed_producers: EngineClosures<ProducerId>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only access to the resource store.
    #[must_use]
    pub fn store(&self) -> &ResourceStore {
        &self.store
    }

    /// Read-only access to the session registry.
    #[must_use]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Register a new session.
    ///
    /// # Errors
    ///
    /// Returns `ScError::Conflict` on a duplicate id.
    pub fn open_session(&mut self, id: SessionId) -> Result<SessionId, ScError> {
        self.sessions.open(id)
    }

    /// Record a transport the engine just created.
    ///
    /// Re-validates that the session is still open: the engine call that
    /// produced `engine_transport` was a suspension point.
    ///
    /// # Errors
    ///
    /// Returns `ScError::UnknownSession` if the session disconnected meanwhile,
    /// or `ScError::TransportNotFound` if the engine already reported the
    /// transport closed. The caller owns closing the orphan on the engine.
    pub fn register_transport(
        &mut self,
        session_id: &SessionId,
        engine_transport: EngineTransport,
    ) -> Result<Transport, ScError> {
        if !self.sessions.is_open(session_id) {
            return Err(ScError::UnknownSession(session_id.to_string()));
        }
        if self.closed_transports.take(&engine_transport.id) {
            return Err(ScError::TransportNotFound(engine_transport.id.to_string()));
        }
        let transport = Transport::from_engine(engine_transport, *session_id);
        self.store.put_transport(transport.clone())?;
        if let Err(e) = self.sessions.attach_transport(session_id, transport.id) {
            self.store.remove_transport(&transport.id);
            return Err(e);
        }
        Ok(transport)
    }

    /// Look up a transport on behalf of a session.
    ///
    /// # Errors
    ///
    /// Returns `ScError::TransportNotFound` if the transport is unknown or
    /// belongs to another session.
    pub fn transport_for(
        &self,
        session_id: &SessionId,
        transport_id: &TransportId,
    ) -> Result<&Transport, ScError> {
        match self.store.get_transport(transport_id) {
            Ok(transport) if transport.session_id == *session_id => Ok(transport),
            _ => Err(ScError::TransportNotFound(transport_id.to_string())),
        }
    }

    /// Move an owned transport from `New` to `Connecting`.
    ///
    /// # Errors
    ///
    /// Returns `ScError::TransportNotFound` if not owned, or
    /// `ScError::InvalidState` if connect was already issued.
    pub fn begin_connect(
        &mut self,
        session_id: &SessionId,
        transport_id: &TransportId,
    ) -> Result<(), ScError> {
        let state = self.transport_for(session_id, transport_id)?.state;
        if state != TransportState::New {
            return Err(ScError::InvalidState(format!(
                "transport is already {}",
                state.as_str()
            )));
        }
        self.store
            .set_transport_state(transport_id, TransportState::Connecting)?;
        Ok(())
    }

    /// Commit the outcome of an engine `connect`.
    ///
    /// On success the transport becomes `Connected`; on failure a transport
    /// still `Connecting` falls back to `New` so the client may retry.
    ///
    /// # Errors
    ///
    /// Returns `ScError::TransportNotFound` if the transport was removed
    /// while the engine call was in flight.
    pub fn finish_connect(
        &mut self,
        transport_id: &TransportId,
        succeeded: bool,
    ) -> Result<TransportState, ScError> {
        let current = self.store.get_transport(transport_id)?.state;
        let next = match (succeeded, current) {
            (true, TransportState::New | TransportState::Connecting) => TransportState::Connected,
            (false, TransportState::Connecting) => TransportState::New,
            (_, state) => state,
        };
        self.store.set_transport_state(transport_id, next)?;
        Ok(next)
    }

    /// Move a transport forward to `target` if it is not already there or past it.
    ///
    /// Returns the new state, or `None` if the transport is gone.
    pub fn advance_transport_state(
        &mut self,
        transport_id: &TransportId,
        target: TransportState,
    ) -> Option<TransportState> {
        let current = self.store.get_transport(transport_id).ok()?.state;
        if target.rank() <= current.rank() {
            return Some(current);
        }
        self.store.set_transport_state(transport_id, target).ok()?;
        Some(target)
    }

    /// Check that a session may produce on a transport.
    ///
    /// # Errors
    ///
    /// Returns `ScError::TransportNotFound` if not owned, or
    /// `ScError::InvalidState` if the transport is not connected.
    pub fn check_producible(
        &self,
        session_id: &SessionId,
        transport_id: &TransportId,
    ) -> Result<(), ScError> {
        let state = self.transport_for(session_id, transport_id)?.state;
        if state != TransportState::Connected {
            return Err(ScError::InvalidState(format!(
                "transport is {}, not connected",
                state.as_str()
            )));
        }
        Ok(())
    }

    /// Record a producer the engine just created.
    ///
    /// # Errors
    ///
    /// Returns `ScError::UnknownSession` if the session disconnected meanwhile,
    /// `ScError::TransportNotFound` if the transport was closed meanwhile, or
    /// `ScError::ProducerNotFound` if the engine already reported the producer
    /// closed. In every case the caller owns closing the orphan on the engine.
    pub fn register_producer(
        &mut self,
        session_id: &SessionId,
        transport_id: &TransportId,
        engine_producer: EngineProducer,
        rtp_parameters: RtpParameters,
    ) -> Result<Producer, ScError> {
        if !self.sessions.is_open(session_id) {
            return Err(ScError::UnknownSession(session_id.to_string()));
        }
        self.transport_for(session_id, transport_id)?;
        if self.closed_producers.take(&engine_producer.id) {
            return Err(ScError::ProducerNotFound(engine_producer.id.to_string()));
        }

        let producer = Producer {
            id: engine_producer.id,
            transport_id: *transport_id,
            kind: engine_producer.kind,
            state: ProducerState::Active,
            rtp_parameters,
        };
        self.store.put_producer(producer.clone())?;
        if let Err(e) = self.sessions.attach_producer(session_id, producer.id) {
            self.store.remove_producer(&producer.id);
            return Err(e);
        }
        Ok(producer)
    }

    /// Remove a producer from the store and from its session's owned set.
    pub fn release_producer(&mut self, producer_id: &ProducerId) -> Option<Producer> {
        let producer = self.store.remove_producer(producer_id)?;
        if let Ok(transport) = self.store.get_transport(&producer.transport_id) {
            let session_id = transport.session_id;
            self.sessions.detach_producer(&session_id, producer_id);
        }
        Some(producer)
    }

    /// Remove a transport and cascade its producers, updating the owning
    /// session's sets in the same step.
    pub fn release_transport(&mut self, transport_id: &TransportId) -> Option<RemovedTransport> {
        let removed = self.store.remove_transport(transport_id)?;
        let session_id = removed.transport.session_id;
        self.sessions.detach_transport(&session_id, transport_id);
        for producer in &removed.producers {
            self.sessions.detach_producer(&session_id, &producer.id);
        }
        Some(removed)
    }

    /// Apply an engine-reported transport closure.
    ///
    /// An id the registry does not hold yet is remembered so a create still
    /// in flight cannot commit it.
    pub fn transport_closed_by_engine(
        &mut self,
        transport_id: &TransportId,
    ) -> Option<RemovedTransport> {
        let removed = self.release_transport(transport_id);
        if removed.is_none() {
            self.closed_transports.record(*transport_id);
        }
        removed
    }

    /// Apply an engine-reported producer closure. See
    /// [`Registry::transport_closed_by_engine`].
    pub fn producer_closed_by_engine(&mut self, producer_id: &ProducerId) -> Option<Producer> {
        let removed = self.release_producer(producer_id);
        if removed.is_none() {
            self.closed_producers.record(*producer_id);
        }
        removed
    }

    /// Number of remembered engine closures not yet matched by a commit.
    #[must_use]
    pub fn pending_engine_closures(&self) -> usize {
        self.closed_transports.len() + self.closed_producers.len()
    }

    /// Every resource id currently registered.
    #[must_use]
    pub fn resource_ids(&self) -> ResourceIds {
        ResourceIds {
            transports: self.store.transport_ids(),
            producers: self.store.producer_ids(),
        }
    }

    /// Mark a session closing and snapshot the resources it owns.
    ///
    /// Returns `None` if the session is unknown or a teardown is already
    /// running for it.
    pub fn begin_teardown(&mut self, session_id: &SessionId) -> Option<TeardownPlan> {
        let transport_ids = self.sessions.begin_close(session_id)?;
        let transports = transport_ids
            .into_iter()
            .map(|transport_id| TransportTeardown {
                transport_id,
                producers: self.store.producers_of(&transport_id),
            })
            .collect();
        Some(TeardownPlan {
            session_id: *session_id,
            transports,
        })
    }

    /// Remove the session record once its resources are released.
    ///
    /// Anything the session still owns is dropped from the store so no record
    /// outlives its owner.
    pub fn finish_teardown(&mut self, session_id: &SessionId) -> Option<ReleasedSession> {
        let released = self.sessions.close(session_id)?;
        for producer_id in &released.producers {
            self.store.remove_producer(producer_id);
        }
        for transport_id in &released.transports {
            self.store.remove_transport(transport_id);
        }
        Some(released)
    }

    /// Derive a session's protocol phase from its transports.
    #[must_use]
    pub fn phase(&self, session_id: &SessionId) -> SessionPhase {
        let Some(session) = self.sessions.get(session_id) else {
            return SessionPhase::Closed;
        };
        if session.state == SessionState::Closing {
            return SessionPhase::Closed;
        }
        if session.transports.is_empty() {
            return SessionPhase::Idle;
        }
        let any_connected = session.transports.iter().any(|id| {
            self.store
                .get_transport(id)
                .is_ok_and(|t| t.state == TransportState::Connected)
        });
        if any_connected {
            SessionPhase::Ready
        } else {
            SessionPhase::Negotiating
        }
    }

    /// Snapshot of one session, if it is registered.
    #[must_use]
    pub fn snapshot(&self, session_id: &SessionId) -> Option<SessionSnapshot> {
        let session = self.sessions.get(session_id)?;
        Some(SessionSnapshot {
            id: session.id,
            phase: self.phase(session_id),
            transports: session.transports.iter().copied().collect(),
            producers: session.producers.iter().copied().collect(),
        })
    }

    #[must_use]
    pub fn status(&self) -> RegistryStatus {
        RegistryStatus {
            sessions: self.sessions.len(),
            transports: self.store.transport_count(),
            producers: self.store.producer_count(),
        }
    }
}
