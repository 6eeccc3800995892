//! `ResourceStore` - authoritative maps of live transports and producers.
//!
//! Alongside the id → record maps the store keeps a transport → producers
//! reverse index, updated on every insert and remove, so scoped teardown is
//! a direct lookup instead of a scan over every producer.
//!
//! Invariants maintained here:
//! - a producer is only stored while its owning transport is stored
//! - an id already live in the store is never inserted again

use crate::engine::params::{DtlsParameters, IceCandidate, IceParameters, RtpParameters};
use crate::engine::EngineTransport;
use crate::errors::ScError;
use crate::types::{MediaKind, ProducerId, ProducerState, SessionId, TransportId, TransportState};

use std::collections::{HashMap, HashSet};

/// A transport owned by exactly one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transport {
    pub id: TransportId,
    /// Owning session. Never reassigned.
    pub session_id: SessionId,
    pub state: TransportState,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
    /// Creation timestamp (unix seconds).
    pub created_at: i64,
}

impl Transport {
    /// Build the record for a transport the engine just created.
    #[must_use]
    pub fn from_engine(engine_transport: EngineTransport, session_id: SessionId) -> Self {
        Self {
            id: engine_transport.id,
            session_id,
            state: TransportState::New,
            ice_parameters: engine_transport.ice_parameters,
            ice_candidates: engine_transport.ice_candidates,
            dtls_parameters: engine_transport.dtls_parameters,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// A media stream a client sends over one transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Producer {
    pub id: ProducerId,
    /// Owning transport, fixed at construction.
    pub transport_id: TransportId,
    pub kind: MediaKind,
    pub state: ProducerState,
    pub rtp_parameters: RtpParameters,
}

/// A transport removed from the store together with the producers it still carried.
#[derive(Debug, Clone)]
pub struct RemovedTransport {
    pub transport: Transport,
    pub producers: Vec<Producer>,
}

/// Authoritative store of live transports and producers.
#[derive(Debug, Default)]
pub struct ResourceStore {
    transports: HashMap<TransportId, Transport>,
    producers: HashMap<ProducerId, Producer>,
    producers_by_transport: HashMap<TransportId, HashSet<ProducerId>>,
}

impl ResourceStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a transport.
    ///
    /// # Errors
    ///
    /// Returns `ScError::Conflict` if the id is already live.
    pub fn put_transport(&mut self, transport: Transport) -> Result<(), ScError> {
        if self.transports.contains_key(&transport.id) {
            return Err(ScError::Conflict("Transport already exists".to_string()));
        }
        self.producers_by_transport
            .insert(transport.id, HashSet::new());
        self.transports.insert(transport.id, transport);
        Ok(())
    }

    /// Look up a transport.
    ///
    /// # Errors
    ///
    /// Returns `ScError::TransportNotFound` if the id is not live.
    pub fn get_transport(&self, id: &TransportId) -> Result<&Transport, ScError> {
        self.transports
            .get(id)
            .ok_or_else(|| ScError::TransportNotFound(id.to_string()))
    }

    /// Update a transport's connection state, returning the previous state.
    ///
    /// # Errors
    ///
    /// Returns `ScError::TransportNotFound` if the id is not live.
    pub fn set_transport_state(
        &mut self,
        id: &TransportId,
        state: TransportState,
    ) -> Result<TransportState, ScError> {
        let transport = self
            .transports
            .get_mut(id)
            .ok_or_else(|| ScError::TransportNotFound(id.to_string()))?;
        Ok(std::mem::replace(&mut transport.state, state))
    }

    /// Remove a transport and cascade-remove any producers still indexed under it.
    ///
    /// Returns `None` if the transport is not live (already removed).
    pub fn remove_transport(&mut self, id: &TransportId) -> Option<RemovedTransport> {
        let mut transport = self.transports.remove(id)?;
        transport.state = TransportState::Closed;

        let producers = self
            .producers_by_transport
            .remove(id)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|producer_id| self.producers.remove(&producer_id))
            .map(|mut producer| {
                producer.state = ProducerState::Closed;
                producer
            })
            .collect();

        Some(RemovedTransport {
            transport,
            producers,
        })
    }

    /// Insert a producer and index it under its transport.
    ///
    /// # Errors
    ///
    /// Returns `ScError::TransportNotFound` if the owning transport is not
    /// live, or `ScError::Conflict` if the producer id is already live.
    pub fn put_producer(&mut self, producer: Producer) -> Result<(), ScError> {
        if self.producers.contains_key(&producer.id) {
            return Err(ScError::Conflict("Producer already exists".to_string()));
        }
        let index = self
            .producers_by_transport
            .get_mut(&producer.transport_id)
            .ok_or_else(|| ScError::TransportNotFound(producer.transport_id.to_string()))?;
        index.insert(producer.id);
        self.producers.insert(producer.id, producer);
        Ok(())
    }

    /// Look up a producer.
    ///
    /// # Errors
    ///
    /// Returns `ScError::ProducerNotFound` if the id is not live.
    pub fn get_producer(&self, id: &ProducerId) -> Result<&Producer, ScError> {
        self.producers
            .get(id)
            .ok_or_else(|| ScError::ProducerNotFound(id.to_string()))
    }

    /// Remove a producer and drop it from the reverse index.
    ///
    /// Returns `None` if the producer is not live (already removed).
    pub fn remove_producer(&mut self, id: &ProducerId) -> Option<Producer> {
        let mut producer = self.producers.remove(id)?;
        if let Some(index) = self.producers_by_transport.get_mut(&producer.transport_id) {
            index.remove(id);
        }
        producer.state = ProducerState::Closed;
        Some(producer)
    }

    /// Producers currently carried by a transport (reverse index lookup).
    #[must_use]
    pub fn producers_of(&self, transport_id: &TransportId) -> Vec<ProducerId> {
        self.producers_by_transport
            .get(transport_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether a transport id is live.
    #[must_use]
    pub fn contains_transport(&self, id: &TransportId) -> bool {
        self.transports.contains_key(id)
    }

    /// Whether a producer id is live.
    #[must_use]
    pub fn contains_producer(&self, id: &ProducerId) -> bool {
        self.producers.contains_key(id)
    }

    /// Number of live transports.
    #[must_use]
    pub fn transport_count(&self) -> usize {
        self.transports.len()
    }

    /// Number of live producers.
    #[must_use]
    pub fn producer_count(&self) -> usize {
        self.producers.len()
    }

    #[must_use]
    pub fn transport_ids(&self) -> Vec<TransportId> {
        self.transports.keys().copied().collect()
    }

    #[must_use]
    pub fn producer_ids(&self) -> Vec<ProducerId> {
        self.producers.keys().copied().collect()
    }
}
