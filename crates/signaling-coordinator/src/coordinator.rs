//! `Coordinator` - process-wide wiring.
//!
//! Owns the registry actor, the teardown coordinator and the engine event
//! pump, and hands out one [`SignalingDispatcher`] per connection.
//!
//! # Engine events
//!
//! | Event | Effect |
//! |-------|--------|
//! | `DtlsStateChanged(connecting/connected)` | transport state advanced, never downgraded |
//! | `DtlsStateChanged(failed)`, `TransportClosed` | transport removed, producers cascaded |
//! | `DtlsStateChanged(closed)` | as above, and the transport is closed on the engine |
//! | `ProducerClosed` | producer removed |
//! | `WorkerDied` | fatal: stop accepting, fail health checks, cancel every connection |
//!
//! A closure for a resource whose create has not committed yet is remembered
//! by the registry, which then refuses the commit. If the event stream lags,
//! the registry is reconciled against [`MediaEngine::dump`].
//!
//! # Shutdown
//!
//! The root token, held by [`Lifecycle`], is cancelled on SIGTERM or engine
//! death. Connections watch
//! a child token and tear their sessions down. The registry actor has its own
//! token, cancelled last by [`Coordinator::close`], so those teardowns can
//! still commit.

use crate::actors::{ActorMetrics, RegistryHandle};
use crate::engine::{DtlsState, EngineEvent, MediaEngine, TransportListenConfig};
use crate::errors::ScError;
use crate::lifecycle::Lifecycle;
use crate::observability::metrics as sc_metrics;
use crate::observability::HealthState;
use crate::registry::RegistryStatus;
use crate::signaling::SignalingDispatcher;
use crate::teardown::TeardownCoordinator;
use crate::types::{SessionId, TransportState};

use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Shared coordinator state. Cheap to clone.
#[derive(Clone)]
pub struct Coordinator {
    engine: Arc<dyn MediaEngine>,
    registry: RegistryHandle,
    teardown: TeardownCoordinator,
    listen: Arc<TransportListenConfig>,
    metrics: Arc<ActorMetrics>,
    lifecycle: Arc<Lifecycle>,
    registry_token: CancellationToken,
}

impl Coordinator {
    /// Start the registry actor and the engine event pump.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(
        coordinator_id: impl Into<String>,
        engine: Arc<dyn MediaEngine>,
        listen: TransportListenConfig,
        health: Arc<HealthState>,
    ) -> Self {
        let coordinator_id: String = coordinator_id.into();
        let metrics = ActorMetrics::new();
        let registry_token = CancellationToken::new();
        let registry = RegistryHandle::new(
            coordinator_id.clone(),
            Arc::clone(&metrics),
            registry_token.clone(),
        );
        let teardown = TeardownCoordinator::new(Arc::clone(&engine), registry.clone());

        let coordinator = Self {
            engine,
            registry,
            teardown,
            listen: Arc::new(listen),
            metrics,
            lifecycle: Lifecycle::new(coordinator_id, health),
            registry_token,
        };

        let events = coordinator.engine.subscribe();
        tokio::spawn(coordinator.clone().run_engine_events(events));

        coordinator
    }

    /// Open a session for a new connection.
    ///
    /// # Errors
    ///
    /// Returns `ScError::EngineUnavailable` after engine death, or
    /// `ScError::InvalidState` while shutting down.
    pub async fn open_session(&self) -> Result<SignalingDispatcher, ScError> {
        if let Some(reason) = self.fatal_reason() {
            return Err(ScError::EngineUnavailable(reason));
        }
        if !self.is_accepting() {
            return Err(ScError::InvalidState(
                "coordinator is shutting down".to_string(),
            ));
        }

        let session_id = self.registry.open_session(SessionId::new()).await?;
        debug!(
            target: "sc.signaling",
            session_id = %session_id,
            "Session opened"
        );
        Ok(SignalingDispatcher::new(
            session_id,
            Arc::clone(&self.engine),
            self.registry.clone(),
            self.teardown.clone(),
            Arc::clone(&self.listen),
            Arc::clone(&self.lifecycle),
        ))
    }

    #[must_use]
    pub fn coordinator_id(&self) -> &str {
        self.lifecycle.coordinator_id()
    }

    #[must_use]
    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    #[must_use]
    pub fn teardown(&self) -> &TeardownCoordinator {
        &self.teardown
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<ActorMetrics> {
        &self.metrics
    }

    #[must_use]
    pub fn health(&self) -> &Arc<HealthState> {
        self.lifecycle.health()
    }

    /// Whether new connections are accepted.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.lifecycle.is_accepting()
    }

    /// Token cancelled when connections must wind down.
    #[must_use]
    pub fn connection_token(&self) -> CancellationToken {
        self.lifecycle.connection_token()
    }

    /// Resolves once shutdown (graceful or fatal) has started.
    pub async fn shutdown_started(&self) {
        self.lifecycle.shutdown_started().await;
    }

    /// Resolves once [`Coordinator::close`] has been called.
    pub async fn closed(&self) {
        self.registry_token.cancelled().await;
    }

    /// Reason the engine died, if it did.
    #[must_use]
    pub fn fatal_reason(&self) -> Option<String> {
        self.lifecycle.fatal_reason()
    }

    /// Watch for engine death.
    #[must_use]
    pub fn subscribe_fatal(&self) -> watch::Receiver<Option<String>> {
        self.lifecycle.subscribe_fatal()
    }

    /// # Errors
    ///
    /// Returns `ScError::Internal` if the registry actor is gone.
    pub async fn status(&self) -> Result<RegistryStatus, ScError> {
        self.registry.get_status().await
    }

    /// Stop accepting connections and tell open ones to disconnect.
    pub fn shutdown(&self) {
        if self.lifecycle.begin_shutdown() {
            info!(
                target: "sc.coordinator",
                coordinator_id = %self.coordinator_id(),
                connections = self.metrics.connection_count(),
                "Coordinator shutting down"
            );
        }
    }

    /// Stop the registry actor. Call after connections have drained.
    pub fn close(&self) {
        self.lifecycle.begin_shutdown();
        self.registry_token.cancel();
    }

    #[instrument(skip_all, name = "sc.engine.events", fields(coordinator_id = %self.coordinator_id()))]
    async fn run_engine_events(self, mut events: broadcast::Receiver<EngineEvent>) {
        loop {
            tokio::select! {
                () = self.registry_token.cancelled() => break,

                event = events.recv() => match event {
                    Ok(event) => self.handle_engine_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            target: "sc.engine",
                            skipped,
                            "Engine event stream lagged, reconciling with engine"
                        );
                        if let Err(e) = self.reconcile().await {
                            warn!(
                                target: "sc.engine",
                                error = %e,
                                "Failed to reconcile with engine"
                            );
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        self.lifecycle.fail("engine event stream closed");
                        break;
                    }
                },
            }
        }
        debug!(target: "sc.engine", "Engine event pump stopped");
    }

    async fn handle_engine_event(&self, event: EngineEvent) {
        let result = match event {
            EngineEvent::DtlsStateChanged {
                transport_id,
                state,
            } => {
                sc_metrics::record_engine_event("dtls_state_changed");
                match state {
                    DtlsState::New => Ok(()),
                    DtlsState::Connecting => self
                        .registry
                        .advance_transport_state(transport_id, TransportState::Connecting)
                        .await
                        .map(|_| ()),
                    DtlsState::Connected => self
                        .registry
                        .advance_transport_state(transport_id, TransportState::Connected)
                        .await
                        .map(|_| ()),
                    DtlsState::Failed | DtlsState::Closed => {
                        let close_on_engine = state == DtlsState::Closed;
                        self.teardown
                            .release_transport(transport_id, close_on_engine)
                            .await
                            .map(|removed| {
                                if removed.is_some() {
                                    info!(
                                        target: "sc.engine",
                                        transport_id = %transport_id,
                                        dtls_state = state.as_str(),
                                        "Transport removed after DTLS state change"
                                    );
                                }
                            })
                    }
                }
            }
            EngineEvent::TransportClosed { transport_id } => {
                sc_metrics::record_engine_event("transport_closed");
                self.teardown
                    .release_transport(transport_id, false)
                    .await
                    .map(|removed| {
                        if let Some(removed) = removed {
                            info!(
                                target: "sc.engine",
                                transport_id = %transport_id,
                                session_id = %removed.transport.session_id,
                                producers = removed.producers.len(),
                                "Transport closed by engine"
                            );
                        }
                    })
            }
            EngineEvent::ProducerClosed { producer_id } => {
                sc_metrics::record_engine_event("producer_closed");
                self.registry
                    .producer_closed_by_engine(producer_id)
                    .await
                    .map(|removed| {
                        if removed.is_some() {
                            info!(
                                target: "sc.engine",
                                producer_id = %producer_id,
                                "Producer closed by engine"
                            );
                        }
                    })
            }
            EngineEvent::WorkerDied { reason } => {
                sc_metrics::record_engine_event("worker_died");
                self.lifecycle.fail(reason);
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!(
                target: "sc.engine",
                error = %e,
                "Failed to apply engine event"
            );
        }
    }

    /// Release every registered resource the engine no longer holds.
    ///
    /// The registry is listed before the engine is dumped, so anything
    /// registered but missing from the dump was closed on the engine side.
    async fn reconcile(&self) -> Result<(), ScError> {
        let registered = self.registry.list_resources().await?;
        let dump = self.engine.dump().await?;

        let mut transports = 0;
        for transport_id in registered
            .transports
            .into_iter()
            .filter(|id| !dump.transports.contains(id))
        {
            if self
                .teardown
                .release_transport(transport_id, false)
                .await?
                .is_some()
            {
                transports += 1;
            }
        }

        let mut producers = 0;
        for producer_id in registered
            .producers
            .into_iter()
            .filter(|id| !dump.producers.contains(id))
        {
            if self
                .registry
                .producer_closed_by_engine(producer_id)
                .await?
                .is_some()
            {
                producers += 1;
            }
        }

        info!(
            target: "sc.engine",
            transports_released = transports,
            producers_released = producers,
            "Reconciled registry with engine"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::engine::LocalEngine;
    use crate::signaling::{SignalingRequest, SignalingResponse};
    use crate::test_support::local_engine;

    fn coordinator(engine: &Arc<LocalEngine>) -> Coordinator {
        let health = Arc::new(HealthState::new());
        health.set_ready();
        Coordinator::new(
            "sc-unit",
            engine.clone(),
            TransportListenConfig::default(),
            health,
        )
    }

    #[tokio::test]
    async fn test_open_session_registers_in_registry() {
        let engine = local_engine();
        let coordinator = coordinator(&engine);

        let dispatcher = coordinator.open_session().await.unwrap();
        let status = coordinator.status().await.unwrap();
        assert_eq!(status.sessions, 1);

        dispatcher.disconnect().await.unwrap();
        assert_eq!(coordinator.status().await.unwrap().sessions, 0);

        coordinator.close();
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_sessions() {
        let engine = local_engine();
        let coordinator = coordinator(&engine);

        coordinator.shutdown();
        assert!(!coordinator.is_accepting());
        assert!(!coordinator.health().is_ready());
        assert!(coordinator.connection_token().is_cancelled());

        let result = coordinator.open_session().await;
        assert!(matches!(result, Err(ScError::InvalidState(_))));

        coordinator.close();
    }

    #[tokio::test]
    async fn test_reconcile_releases_resources_missing_from_engine() {
        let engine = local_engine();
        let coordinator = coordinator(&engine);
        let dispatcher = coordinator.open_session().await.unwrap();

        let kept = dispatcher
            .dispatch(SignalingRequest::CreateWebRtcTransport)
            .await
            .unwrap();
        let dropped = dispatcher
            .dispatch(SignalingRequest::CreateWebRtcTransport)
            .await
            .unwrap();
        let (
            SignalingResponse::TransportCreated { params: kept },
            SignalingResponse::TransportCreated { params: dropped },
        ) = (kept, dropped)
        else {
            panic!("unexpected responses");
        };

        // Closed on the engine with no event reaching the coordinator.
        engine.close_transport(dropped.id).await.unwrap();
        coordinator.reconcile().await.unwrap();

        let snapshot = coordinator
            .registry()
            .get_session(dispatcher.session_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.transports, vec![kept.id]);
        assert_eq!(coordinator.status().await.unwrap().transports, 1);

        coordinator.close();
    }

    #[tokio::test]
    async fn test_fail_marks_fatal() {
        let engine = local_engine();
        let coordinator = coordinator(&engine);
        let mut fatal = coordinator.subscribe_fatal();

        coordinator.lifecycle.fail("worker exited with status 137");

        fatal.changed().await.unwrap();
        assert_eq!(
            fatal.borrow().as_deref(),
            Some("worker exited with status 137")
        );
        assert!(!coordinator.health().is_live());
        assert!(matches!(
            coordinator.open_session().await,
            Err(ScError::EngineUnavailable(_))
        ));

        coordinator.close();
    }
}
