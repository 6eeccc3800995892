//! `SignalingDispatcher` - turns one session's requests into engine calls
//! and registry commits.
//!
//! Each engine call is a suspension point. The dispatcher never carries a
//! read across one: anything it learned before the await is re-checked by
//! the registry actor when the result is committed. When a commit is refused
//! (session gone, transport gone) the resource the engine just created is an
//! orphan and is closed on the spot.
//!
//! An `EngineUnavailable` result is fatal to the whole process, not just the
//! request, and is reported to the shared [`Lifecycle`].

use crate::actors::RegistryHandle;
use crate::engine::params::{DtlsParameters, RtpParameters};
use crate::engine::{MediaEngine, TransportListenConfig};
use crate::errors::ScError;
use crate::lifecycle::Lifecycle;
use crate::teardown::{TeardownCoordinator, TeardownReport};
use crate::types::{MediaKind, SessionId, SessionPhase, TransportId};

use super::protocol::{SignalingRequest, SignalingResponse, TransportParams};

use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Request handler bound to one session. Cheap to clone into request tasks.
#[derive(Clone)]
pub struct SignalingDispatcher {
    session_id: SessionId,
    engine: Arc<dyn MediaEngine>,
    registry: RegistryHandle,
    teardown: TeardownCoordinator,
    listen: Arc<TransportListenConfig>,
    lifecycle: Arc<Lifecycle>,
}

impl SignalingDispatcher {
    #[must_use]
    pub fn new(
        session_id: SessionId,
        engine: Arc<dyn MediaEngine>,
        registry: RegistryHandle,
        teardown: TeardownCoordinator,
        listen: Arc<TransportListenConfig>,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        Self {
            session_id,
            engine,
            registry,
            teardown,
            listen,
            lifecycle,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Current protocol phase of the session.
    ///
    /// # Errors
    ///
    /// Returns `ScError::Internal` if the registry actor is gone.
    pub async fn phase(&self) -> Result<SessionPhase, ScError> {
        Ok(self
            .registry
            .get_session(self.session_id)
            .await?
            .map_or(SessionPhase::Closed, |s| s.phase))
    }

    /// Handle one request.
    ///
    /// # Errors
    ///
    /// Any `ScError`; the caller turns it into an error ack. A fatal error
    /// has already put the process on the fatal path when it is returned.
    pub async fn dispatch(&self, request: SignalingRequest) -> Result<SignalingResponse, ScError> {
        let result = self.handle(request).await;
        if let Err(e) = &result {
            if e.is_fatal() {
                warn!(
                    target: "sc.signaling",
                    session_id = %self.session_id,
                    error = %e,
                    "Engine unavailable during request"
                );
                self.lifecycle.fail(e.to_string());
            }
        }
        result
    }

    async fn handle(&self, request: SignalingRequest) -> Result<SignalingResponse, ScError> {
        match request {
            SignalingRequest::GetRouterRtpCapabilities => Ok(self.router_rtp_capabilities()),
            SignalingRequest::CreateWebRtcTransport => self.create_webrtc_transport().await,
            SignalingRequest::ConnectTransport {
                transport_id,
                dtls_parameters,
            } => {
                self.connect_transport(&transport_id, &dtls_parameters)
                    .await
            }
            SignalingRequest::Produce {
                transport_id,
                kind,
                rtp_parameters,
            } => self.produce(&transport_id, kind, rtp_parameters).await,
        }
    }

    /// Release everything this session owns. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `ScError::Internal` if the registry actor is gone.
    pub async fn disconnect(&self) -> Result<Option<TeardownReport>, ScError> {
        self.teardown.teardown(self.session_id).await
    }

    fn router_rtp_capabilities(&self) -> SignalingResponse {
        SignalingResponse::RouterRtpCapabilities {
            rtp_capabilities: self.engine.router_rtp_capabilities().as_ref().clone(),
        }
    }

    #[instrument(skip_all, name = "sc.signaling.create_transport", fields(session_id = %self.session_id))]
    async fn create_webrtc_transport(&self) -> Result<SignalingResponse, ScError> {
        if self.phase().await? == SessionPhase::Closed {
            return Err(ScError::UnknownSession(self.session_id.to_string()));
        }

        let created = self.engine.create_webrtc_transport(&self.listen).await?;
        let transport_id = created.id;

        match self
            .registry
            .register_transport(self.session_id, created)
            .await
        {
            Ok(transport) => {
                debug!(
                    target: "sc.signaling",
                    session_id = %self.session_id,
                    transport_id = %transport_id,
                    candidates = transport.ice_candidates.len(),
                    "Transport created"
                );
                Ok(SignalingResponse::TransportCreated {
                    params: TransportParams::from(&transport),
                })
            }
            Err(e) => {
                self.teardown.close_orphan_transport(transport_id).await;
                Err(e)
            }
        }
    }

    #[instrument(skip_all, name = "sc.signaling.connect_transport", fields(session_id = %self.session_id))]
    async fn connect_transport(
        &self,
        raw_transport_id: &str,
        dtls_parameters: &DtlsParameters,
    ) -> Result<SignalingResponse, ScError> {
        let transport_id = parse_transport_id(raw_transport_id)?;
        self.registry
            .begin_connect(self.session_id, transport_id)
            .await?;

        let outcome = self
            .engine
            .connect_transport(transport_id, dtls_parameters)
            .await;
        let committed = self
            .registry
            .finish_connect(transport_id, outcome.is_ok())
            .await;

        outcome?;
        committed?;
        debug!(
            target: "sc.signaling",
            session_id = %self.session_id,
            transport_id = %transport_id,
            "Transport connected"
        );
        Ok(SignalingResponse::TransportConnected { success: true })
    }

    #[instrument(skip_all, name = "sc.signaling.produce", fields(session_id = %self.session_id, kind = kind.as_str()))]
    async fn produce(
        &self,
        raw_transport_id: &str,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<SignalingResponse, ScError> {
        let transport_id = parse_transport_id(raw_transport_id)?;
        self.registry
            .check_producible(self.session_id, transport_id)
            .await?;

        let produced = self
            .engine
            .produce(transport_id, kind, &rtp_parameters)
            .await?;

        match self
            .registry
            .register_producer(self.session_id, transport_id, produced, rtp_parameters)
            .await
        {
            Ok(producer) => {
                debug!(
                    target: "sc.signaling",
                    session_id = %self.session_id,
                    transport_id = %transport_id,
                    producer_id = %producer.id,
                    "Producer created"
                );
                Ok(SignalingResponse::Produced { id: producer.id })
            }
            Err(e) => {
                self.teardown.close_orphan_producer(produced.id).await;
                Err(e)
            }
        }
    }
}

/// A transport id that does not parse cannot name a live transport.
fn parse_transport_id(raw: &str) -> Result<TransportId, ScError> {
    TransportId::parse(raw).ok_or_else(|| ScError::TransportNotFound(raw.to_string()))
}
