//! Message types for the registry actor.
//!
//! Each request carries a `oneshot` sender for its reply. Mutations that
//! follow an engine call are committed as a single message so the actor can
//! re-validate the session and ownership in the same step.

use crate::engine::params::RtpParameters;
use crate::engine::{EngineProducer, EngineTransport};
use crate::errors::ScError;
use crate::registry::{
    Producer, RegistryStatus, ReleasedSession, RemovedTransport, ResourceIds, SessionSnapshot,
    TeardownPlan, Transport,
};
use crate::types::{ProducerId, SessionId, TransportId, TransportState};
use tokio::sync::oneshot;

/// Messages sent to `RegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Register a new session.
    OpenSession {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<SessionId, ScError>>,
    },

    /// Commit a transport the engine created for a session.
    RegisterTransport {
        session_id: SessionId,
        transport: EngineTransport,
        respond_to: oneshot::Sender<Result<Transport, ScError>>,
    },

    /// Read a transport the session owns.
    GetTransport {
        session_id: SessionId,
        transport_id: TransportId,
        respond_to: oneshot::Sender<Result<Transport, ScError>>,
    },

    /// Mark an owned transport as connecting before the engine call.
    BeginConnect {
        session_id: SessionId,
        transport_id: TransportId,
        respond_to: oneshot::Sender<Result<(), ScError>>,
    },

    /// Commit the outcome of an engine connect.
    FinishConnect {
        transport_id: TransportId,
        succeeded: bool,
        respond_to: oneshot::Sender<Result<TransportState, ScError>>,
    },

    /// Check that the session may produce on the transport.
    CheckProducible {
        session_id: SessionId,
        transport_id: TransportId,
        respond_to: oneshot::Sender<Result<(), ScError>>,
    },

    /// Commit a producer the engine created.
    RegisterProducer {
        session_id: SessionId,
        transport_id: TransportId,
        producer: EngineProducer,
        rtp_parameters: RtpParameters,
        respond_to: oneshot::Sender<Result<Producer, ScError>>,
    },

    /// Read a producer by id.
    GetProducer {
        producer_id: ProducerId,
        respond_to: oneshot::Sender<Result<Producer, ScError>>,
    },

    /// Drop a producer from the store and its owning session.
    ReleaseProducer {
        producer_id: ProducerId,
        respond_to: oneshot::Sender<Option<Producer>>,
    },

    /// Drop a transport (and cascade its producers).
    ReleaseTransport {
        transport_id: TransportId,
        respond_to: oneshot::Sender<Option<RemovedTransport>>,
    },

    /// The engine closed a transport on its own. Remembered if not yet committed.
    TransportClosedByEngine {
        transport_id: TransportId,
        respond_to: oneshot::Sender<Option<RemovedTransport>>,
    },

    /// The engine closed a producer on its own. Remembered if not yet committed.
    ProducerClosedByEngine {
        producer_id: ProducerId,
        respond_to: oneshot::Sender<Option<Producer>>,
    },

    /// Every registered resource id (for reconciling with the engine).
    ListResources {
        respond_to: oneshot::Sender<ResourceIds>,
    },

    /// Engine-reported DTLS progress; applied monotonically.
    AdvanceTransportState {
        transport_id: TransportId,
        state: TransportState,
        respond_to: oneshot::Sender<Option<TransportState>>,
    },

    /// Mark a session closing and return what it owns.
    BeginTeardown {
        session_id: SessionId,
        respond_to: oneshot::Sender<Option<TeardownPlan>>,
    },

    /// Remove the session record after its resources are released.
    FinishTeardown {
        session_id: SessionId,
        respond_to: oneshot::Sender<Option<ReleasedSession>>,
    },

    /// Snapshot one session (for diagnostics and tests).
    GetSession {
        session_id: SessionId,
        respond_to: oneshot::Sender<Option<SessionSnapshot>>,
    },

    /// Aggregate counts (for health and metrics).
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },
}
