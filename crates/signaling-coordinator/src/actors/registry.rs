//! `RegistryActor` - single writer for sessions and resources.
//!
//! The actor owns the only [`Registry`]. Every read and mutation is a message
//! on its mailbox, so operations on the same id are linearizable and a
//! mutation that touches both the store and a session's owned set is never
//! observed half-done.
//!
//! The actor never calls the media engine. Callers do the engine work in
//! their own task, then commit the result with a message that re-validates
//! preconditions (session still open, transport still owned).

use crate::engine::params::RtpParameters;
use crate::engine::{EngineProducer, EngineTransport};
use crate::errors::ScError;
use crate::observability::metrics as sc_metrics;
use crate::registry::{
    Producer, Registry, RegistryStatus, ReleasedSession, RemovedTransport, ResourceIds,
    SessionSnapshot, TeardownPlan, Transport,
};
use crate::types::{ProducerId, SessionId, TransportId, TransportState};

use super::messages::RegistryMessage;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// Handle to the `RegistryActor`.
#[derive(Clone)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl RegistryHandle {
    /// Spawn the registry actor and return a handle to it.
    ///
    /// The actor stops when `cancel_token` is cancelled or every handle is
    /// dropped.
    #[must_use]
    pub fn new(
        coordinator_id: String,
        metrics: Arc<ActorMetrics>,
        cancel_token: CancellationToken,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let actor = RegistryActor::new(coordinator_id, receiver, cancel_token.clone());
        let task = tokio::spawn(actor.run());

        // Requests fail with `Internal` once the actor is gone; a panic is
        // additionally counted.
        tokio::spawn(async move {
            if let Err(e) = task.await {
                if e.is_panic() {
                    metrics.record_panic(ActorType::Registry);
                }
            }
        });
        Self {
            sender,
            cancel_token,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryMessage,
    ) -> Result<T, ScError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))
    }

    /// Register a new session.
    pub async fn open_session(&self, session_id: SessionId) -> Result<SessionId, ScError> {
        self.request(|respond_to| RegistryMessage::OpenSession {
            session_id,
            respond_to,
        })
        .await?
    }

    /// Commit a transport the engine created.
    ///
    /// `Err(UnknownSession)` means the session disconnected during the engine
    /// call; the caller must close the transport on the engine.
    pub async fn register_transport(
        &self,
        session_id: SessionId,
        transport: EngineTransport,
    ) -> Result<Transport, ScError> {
        self.request(|respond_to| RegistryMessage::RegisterTransport {
            session_id,
            transport,
            respond_to,
        })
        .await?
    }

    /// Read a transport the session owns.
    pub async fn get_transport(
        &self,
        session_id: SessionId,
        transport_id: TransportId,
    ) -> Result<Transport, ScError> {
        self.request(|respond_to| RegistryMessage::GetTransport {
            session_id,
            transport_id,
            respond_to,
        })
        .await?
    }

    pub async fn begin_connect(
        &self,
        session_id: SessionId,
        transport_id: TransportId,
    ) -> Result<(), ScError> {
        self.request(|respond_to| RegistryMessage::BeginConnect {
            session_id,
            transport_id,
            respond_to,
        })
        .await?
    }

    pub async fn finish_connect(
        &self,
        transport_id: TransportId,
        succeeded: bool,
    ) -> Result<TransportState, ScError> {
        self.request(|respond_to| RegistryMessage::FinishConnect {
            transport_id,
            succeeded,
            respond_to,
        })
        .await?
    }

    pub async fn check_producible(
        &self,
        session_id: SessionId,
        transport_id: TransportId,
    ) -> Result<(), ScError> {
        self.request(|respond_to| RegistryMessage::CheckProducible {
            session_id,
            transport_id,
            respond_to,
        })
        .await?
    }

    /// Commit a producer the engine created.
    ///
    /// Any error means the producer is an orphan the caller must close.
    pub async fn register_producer(
        &self,
        session_id: SessionId,
        transport_id: TransportId,
        producer: EngineProducer,
        rtp_parameters: RtpParameters,
    ) -> Result<Producer, ScError> {
        self.request(|respond_to| RegistryMessage::RegisterProducer {
            session_id,
            transport_id,
            producer,
            rtp_parameters,
            respond_to,
        })
        .await?
    }

    pub async fn get_producer(&self, producer_id: ProducerId) -> Result<Producer, ScError> {
        self.request(|respond_to| RegistryMessage::GetProducer {
            producer_id,
            respond_to,
        })
        .await?
    }

    pub async fn release_producer(
        &self,
        producer_id: ProducerId,
    ) -> Result<Option<Producer>, ScError> {
        self.request(|respond_to| RegistryMessage::ReleaseProducer {
            producer_id,
            respond_to,
        })
        .await
    }

    pub async fn release_transport(
        &self,
        transport_id: TransportId,
    ) -> Result<Option<RemovedTransport>, ScError> {
        self.request(|respond_to| RegistryMessage::ReleaseTransport {
            transport_id,
            respond_to,
        })
        .await
    }

    /// Apply an engine-side transport closure, cascading its producers.
    pub async fn transport_closed_by_engine(
        &self,
        transport_id: TransportId,
    ) -> Result<Option<RemovedTransport>, ScError> {
        self.request(|respond_to| RegistryMessage::TransportClosedByEngine {
            transport_id,
            respond_to,
        })
        .await
    }

    pub async fn producer_closed_by_engine(
        &self,
        producer_id: ProducerId,
    ) -> Result<Option<Producer>, ScError> {
        self.request(|respond_to| RegistryMessage::ProducerClosedByEngine {
            producer_id,
            respond_to,
        })
        .await
    }

    pub async fn list_resources(&self) -> Result<ResourceIds, ScError> {
        self.request(|respond_to| RegistryMessage::ListResources { respond_to })
            .await
    }

    pub async fn advance_transport_state(
        &self,
        transport_id: TransportId,
        state: TransportState,
    ) -> Result<Option<TransportState>, ScError> {
        self.request(|respond_to| RegistryMessage::AdvanceTransportState {
            transport_id,
            state,
            respond_to,
        })
        .await
    }

    /// Mark a session closing. `None` if unknown or already being torn down.
    pub async fn begin_teardown(
        &self,
        session_id: SessionId,
    ) -> Result<Option<TeardownPlan>, ScError> {
        self.request(|respond_to| RegistryMessage::BeginTeardown {
            session_id,
            respond_to,
        })
        .await
    }

    pub async fn finish_teardown(
        &self,
        session_id: SessionId,
    ) -> Result<Option<ReleasedSession>, ScError> {
        self.request(|respond_to| RegistryMessage::FinishTeardown {
            session_id,
            respond_to,
        })
        .await
    }

    pub async fn get_session(
        &self,
        session_id: SessionId,
    ) -> Result<Option<SessionSnapshot>, ScError> {
        self.request(|respond_to| RegistryMessage::GetSession {
            session_id,
            respond_to,
        })
        .await
    }

    pub async fn get_status(&self) -> Result<RegistryStatus, ScError> {
        self.request(|respond_to| RegistryMessage::GetStatus { respond_to })
            .await
    }

    /// Stop the actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `RegistryActor` implementation.
pub struct RegistryActor {
    coordinator_id: String,
    receiver: mpsc::Receiver<RegistryMessage>,
    cancel_token: CancellationToken,
    registry: Registry,
    mailbox: MailboxMonitor,
}

impl RegistryActor {
    fn new(
        coordinator_id: String,
        receiver: mpsc::Receiver<RegistryMessage>,
        cancel_token: CancellationToken,
    ) -> Self {
        let mailbox = MailboxMonitor::new(ActorType::Registry, &coordinator_id);
        Self {
            coordinator_id,
            receiver,
            cancel_token,
            registry: Registry::new(),
            mailbox,
        }
    }

    #[instrument(skip_all, name = "sc.actor.registry", fields(coordinator_id = %self.coordinator_id))]
    async fn run(mut self) {
        info!(
            target: "sc.actor.registry",
            coordinator_id = %self.coordinator_id,
            "RegistryActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sc.actor.registry",
                        coordinator_id = %self.coordinator_id,
                        "RegistryActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.observe(self.receiver.len());
                            let mutates = self.handle_message(message);
                            if mutates {
                                sc_metrics::set_registry_counts(&self.registry.status());
                            }
                        }
                        None => {
                            info!(
                                target: "sc.actor.registry",
                                coordinator_id = %self.coordinator_id,
                                "RegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        let status = self.registry.status();
        info!(
            target: "sc.actor.registry",
            coordinator_id = %self.coordinator_id,
            sessions_remaining = status.sessions,
            transports_remaining = status.transports,
            producers_remaining = status.producers,
            messages_processed = self.mailbox.messages_processed(),
            "RegistryActor stopped"
        );
    }

    /// Handle one message. Returns whether it may have changed the counts.
    fn handle_message(&mut self, message: RegistryMessage) -> bool {
        match message {
            RegistryMessage::OpenSession {
                session_id,
                respond_to,
            } => {
                let result = self.registry.open_session(session_id);
                if result.is_ok() {
                    debug!(
                        target: "sc.actor.registry",
                        session_id = %session_id,
                        total_sessions = self.registry.sessions().len(),
                        "Session opened"
                    );
                }
                let _ = respond_to.send(result);
                true
            }

            RegistryMessage::RegisterTransport {
                session_id,
                transport,
                respond_to,
            } => {
                let transport_id = transport.id;
                let result = self.registry.register_transport(&session_id, transport);
                match &result {
                    Ok(_) => debug!(
                        target: "sc.actor.registry",
                        session_id = %session_id,
                        transport_id = %transport_id,
                        "Transport registered"
                    ),
                    Err(e) => debug!(
                        target: "sc.actor.registry",
                        session_id = %session_id,
                        transport_id = %transport_id,
                        error = %e,
                        "Transport registration refused"
                    ),
                }
                let _ = respond_to.send(result);
                true
            }

            RegistryMessage::GetTransport {
                session_id,
                transport_id,
                respond_to,
            } => {
                let result = self
                    .registry
                    .transport_for(&session_id, &transport_id)
                    .cloned();
                let _ = respond_to.send(result);
                false
            }

            RegistryMessage::BeginConnect {
                session_id,
                transport_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.registry.begin_connect(&session_id, &transport_id));
                false
            }

            RegistryMessage::FinishConnect {
                transport_id,
                succeeded,
                respond_to,
            } => {
                let result = self.registry.finish_connect(&transport_id, succeeded);
                if let Ok(state) = &result {
                    debug!(
                        target: "sc.actor.registry",
                        transport_id = %transport_id,
                        state = state.as_str(),
                        "Transport connect committed"
                    );
                }
                let _ = respond_to.send(result);
                false
            }

            RegistryMessage::CheckProducible {
                session_id,
                transport_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.registry.check_producible(&session_id, &transport_id));
                false
            }

            RegistryMessage::RegisterProducer {
                session_id,
                transport_id,
                producer,
                rtp_parameters,
                respond_to,
            } => {
                let producer_id = producer.id;
                let result = self.registry.register_producer(
                    &session_id,
                    &transport_id,
                    producer,
                    rtp_parameters,
                );
                if result.is_ok() {
                    debug!(
                        target: "sc.actor.registry",
                        session_id = %session_id,
                        transport_id = %transport_id,
                        producer_id = %producer_id,
                        "Producer registered"
                    );
                }
                let _ = respond_to.send(result);
                true
            }

            RegistryMessage::GetProducer {
                producer_id,
                respond_to,
            } => {
                let result = self.registry.store().get_producer(&producer_id).cloned();
                let _ = respond_to.send(result);
                false
            }

            RegistryMessage::ReleaseProducer {
                producer_id,
                respond_to,
            } => {
                let removed = self.registry.release_producer(&producer_id);
                let _ = respond_to.send(removed);
                true
            }

            RegistryMessage::ReleaseTransport {
                transport_id,
                respond_to,
            } => {
                let removed = self.registry.release_transport(&transport_id);
                if let Some(removed) = &removed {
                    if !removed.producers.is_empty() {
                        debug!(
                            target: "sc.actor.registry",
                            transport_id = %transport_id,
                            cascaded_producers = removed.producers.len(),
                            "Transport released with producers still attached"
                        );
                    }
                }
                let _ = respond_to.send(removed);
                true
            }

            RegistryMessage::TransportClosedByEngine {
                transport_id,
                respond_to,
            } => {
                let removed = self.registry.transport_closed_by_engine(&transport_id);
                if removed.is_none() {
                    debug!(
                        target: "sc.actor.registry",
                        transport_id = %transport_id,
                        "Engine closed a transport not yet registered"
                    );
                }
                let _ = respond_to.send(removed);
                true
            }

            RegistryMessage::ProducerClosedByEngine {
                producer_id,
                respond_to,
            } => {
                let removed = self.registry.producer_closed_by_engine(&producer_id);
                if removed.is_none() {
                    debug!(
                        target: "sc.actor.registry",
                        producer_id = %producer_id,
                        "Engine closed a producer not yet registered"
                    );
                }
                let _ = respond_to.send(removed);
                true
            }

            RegistryMessage::ListResources { respond_to } => {
                let _ = respond_to.send(self.registry.resource_ids());
                false
            }

            RegistryMessage::AdvanceTransportState {
                transport_id,
                state,
                respond_to,
            } => {
                let _ = respond_to.send(self.registry.advance_transport_state(&transport_id, state));
                false
            }

            RegistryMessage::BeginTeardown {
                session_id,
                respond_to,
            } => {
                let plan = self.registry.begin_teardown(&session_id);
                let _ = respond_to.send(plan);
                false
            }

            RegistryMessage::FinishTeardown {
                session_id,
                respond_to,
            } => {
                let released = self.registry.finish_teardown(&session_id);
                if let Some(released) = &released {
                    if !released.is_empty() {
                        warn!(
                            target: "sc.actor.registry",
                            session_id = %session_id,
                            leftover_transports = released.transports.len(),
                            leftover_producers = released.producers.len(),
                            "Session removed with resources still attached"
                        );
                    }
                }
                let _ = respond_to.send(released);
                true
            }

            RegistryMessage::GetSession {
                session_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.registry.snapshot(&session_id));
                false
            }

            RegistryMessage::GetStatus { respond_to } => {
                sc_metrics::set_actor_mailbox_depth(
                    ActorType::Registry.as_str(),
                    self.mailbox.current_depth(),
                );
                let _ = respond_to.send(self.registry.status());
                false
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::params::{DtlsParameters, DtlsRole, IceParameters};
    use crate::types::{MediaKind, SessionPhase};

    fn handle() -> RegistryHandle {
        RegistryHandle::new(
            "sc-test".to_string(),
            ActorMetrics::new(),
            CancellationToken::new(),
        )
    }

    fn engine_transport() -> EngineTransport {
        EngineTransport {
            id: TransportId::new(),
            ice_parameters: IceParameters {
                username_fragment: "u".to_string(),
                password: "p".to_string(),
                ice_lite: true,
            },
            ice_candidates: Vec::new(),
            dtls_parameters: DtlsParameters {
                role: DtlsRole::Auto,
                fingerprints: Vec::new(),
            },
        }
    }

    fn rtp() -> RtpParameters {
        RtpParameters {
            mid: None,
            codecs: Vec::new(),
            header_extensions: Vec::new(),
            encodings: Vec::new(),
            rtcp: None,
        }
    }

    #[tokio::test]
    async fn test_open_register_and_read_back() {
        let registry = handle();
        let session_id = registry.open_session(SessionId::new()).await.unwrap();

        let transport = registry
            .register_transport(session_id, engine_transport())
            .await
            .unwrap();
        let read = registry
            .get_transport(session_id, transport.id)
            .await
            .unwrap();
        assert_eq!(read.id, transport.id);
        assert_eq!(read.session_id, session_id);

        let snapshot = registry.get_session(session_id).await.unwrap().unwrap();
        assert_eq!(snapshot.phase, SessionPhase::Negotiating);

        registry.cancel();
    }

    #[tokio::test]
    async fn test_engine_closure_before_commit_refuses_registration() {
        let registry = handle();
        let session_id = registry.open_session(SessionId::new()).await.unwrap();
        let created = engine_transport();

        assert!(registry
            .transport_closed_by_engine(created.id)
            .await
            .unwrap()
            .is_none());
        let result = registry.register_transport(session_id, created).await;
        assert!(matches!(result, Err(ScError::TransportNotFound(_))));

        let listed = registry.list_resources().await.unwrap();
        assert!(listed.transports.is_empty());
        assert!(listed.producers.is_empty());

        registry.cancel();
    }

    #[tokio::test]
    async fn test_duplicate_session_conflicts() {
        let registry = handle();
        let session_id = SessionId::new();
        registry.open_session(session_id).await.unwrap();
        let result = registry.open_session(session_id).await;
        assert!(matches!(result, Err(ScError::Conflict(_))));
        registry.cancel();
    }

    #[tokio::test]
    async fn test_producer_lifecycle_through_handle() {
        let registry = handle();
        let session_id = registry.open_session(SessionId::new()).await.unwrap();
        let transport = registry
            .register_transport(session_id, engine_transport())
            .await
            .unwrap();

        registry
            .begin_connect(session_id, transport.id)
            .await
            .unwrap();
        registry.finish_connect(transport.id, true).await.unwrap();
        registry
            .check_producible(session_id, transport.id)
            .await
            .unwrap();

        let producer = registry
            .register_producer(
                session_id,
                transport.id,
                EngineProducer {
                    id: ProducerId::new(),
                    kind: MediaKind::Video,
                },
                rtp(),
            )
            .await
            .unwrap();
        assert_eq!(producer.transport_id, transport.id);
        assert_eq!(
            registry.get_producer(producer.id).await.unwrap().kind,
            MediaKind::Video
        );

        let status = registry.get_status().await.unwrap();
        assert_eq!(status.producers, 1);

        let removed = registry
            .release_transport(transport.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(removed.producers.len(), 1);
        assert!(matches!(
            registry.get_producer(producer.id).await,
            Err(ScError::ProducerNotFound(_))
        ));

        registry.cancel();
    }

    #[tokio::test]
    async fn test_requests_fail_after_cancel() {
        let registry = handle();
        registry.cancel();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert!(registry.is_cancelled());
        let result = registry.get_status().await;
        assert!(matches!(result, Err(ScError::Internal(_))));
    }
}
