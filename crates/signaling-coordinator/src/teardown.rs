//! `TeardownCoordinator` - releases exactly one session's resources.
//!
//! Teardown reads the session's own owned set, never the global store, so a
//! disconnect can only close what that session created. Engine close errors
//! are logged and skipped; the registry is updated regardless so no record
//! outlives its session.
//!
//! The same type closes orphans: engine resources that finished creating
//! after their owner disconnected or their transport vanished.

use crate::actors::RegistryHandle;
use crate::engine::MediaEngine;
use crate::errors::ScError;
use crate::observability::metrics as sc_metrics;
use crate::registry::RemovedTransport;
use crate::types::{ProducerId, SessionId, TransportId};

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// What a teardown released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub transports_closed: usize,
    pub producers_closed: usize,
    /// Engine close calls that returned an error (logged and skipped).
    pub engine_failures: usize,
}

/// Closes session-scoped resources on the engine and in the registry.
#[derive(Clone)]
pub struct TeardownCoordinator {
    engine: Arc<dyn MediaEngine>,
    registry: RegistryHandle,
}

impl TeardownCoordinator {
    #[must_use]
    pub fn new(engine: Arc<dyn MediaEngine>, registry: RegistryHandle) -> Self {
        Self { engine, registry }
    }

    /// Tear down one session.
    ///
    /// Returns `Ok(None)` when the session is unknown or another teardown
    /// already owns it; a repeated teardown has no side effects.
    ///
    /// # Errors
    ///
    /// Returns `ScError::Internal` only if the registry actor is gone.
    #[instrument(skip_all, name = "sc.teardown", fields(session_id = %session_id))]
    pub async fn teardown(&self, session_id: SessionId) -> Result<Option<TeardownReport>, ScError> {
        let started = Instant::now();
        let Some(plan) = self.registry.begin_teardown(session_id).await? else {
            debug!(
                target: "sc.teardown",
                session_id = %session_id,
                "Teardown skipped, session unknown or already closing"
            );
            return Ok(None);
        };

        debug!(
            target: "sc.teardown",
            session_id = %session_id,
            transports = plan.transports.len(),
            resources = plan.resource_count(),
            "Teardown started"
        );

        let mut report = TeardownReport::default();
        for transport in plan.transports {
            for producer_id in transport.producers {
                if !self.close_producer_on_engine(producer_id).await {
                    report.engine_failures += 1;
                }
                if self.registry.release_producer(producer_id).await?.is_some() {
                    report.producers_closed += 1;
                }
            }

            if !self.close_transport_on_engine(transport.transport_id).await {
                report.engine_failures += 1;
            }
            if let Some(removed) = self
                .registry
                .release_transport(transport.transport_id)
                .await?
            {
                report.transports_closed += 1;
                // Producers registered after the plan was taken.
                report.producers_closed += removed.producers.len();
            }
        }

        self.registry.finish_teardown(session_id).await?;

        sc_metrics::record_teardown(
            started.elapsed(),
            report.transports_closed,
            report.producers_closed,
        );
        info!(
            target: "sc.teardown",
            session_id = %session_id,
            transports_closed = report.transports_closed,
            producers_closed = report.producers_closed,
            engine_failures = report.engine_failures,
            "Session torn down"
        );
        Ok(Some(report))
    }

    /// Close a transport the engine created for a caller that can no longer own it.
    pub async fn close_orphan_transport(&self, transport_id: TransportId) {
        info!(
            target: "sc.teardown",
            transport_id = %transport_id,
            "Closing orphaned transport"
        );
        self.close_transport_on_engine(transport_id).await;
        sc_metrics::record_orphan_closed("transport");
    }

    /// Close a producer the engine created for a caller that can no longer own it.
    pub async fn close_orphan_producer(&self, producer_id: ProducerId) {
        info!(
            target: "sc.teardown",
            producer_id = %producer_id,
            "Closing orphaned producer"
        );
        self.close_producer_on_engine(producer_id).await;
        sc_metrics::record_orphan_closed("producer");
    }

    /// Drop a transport the engine reported closed or failed, cascading its
    /// producers. With `close_on_engine` the engine is told to close it too.
    ///
    /// A transport whose create has not been committed yet is remembered by
    /// the registry, so the commit fails and the creator closes the orphan.
    ///
    /// # Errors
    ///
    /// Returns `ScError::Internal` only if the registry actor is gone.
    pub async fn release_transport(
        &self,
        transport_id: TransportId,
        close_on_engine: bool,
    ) -> Result<Option<RemovedTransport>, ScError> {
        let removed = self.registry.transport_closed_by_engine(transport_id).await?;
        if close_on_engine && removed.is_some() {
            self.close_transport_on_engine(transport_id).await;
        }
        Ok(removed)
    }

    /// Returns false if the engine reported an error.
    async fn close_producer_on_engine(&self, producer_id: ProducerId) -> bool {
        match self.engine.close_producer(producer_id).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    target: "sc.teardown",
                    producer_id = %producer_id,
                    error = %e,
                    "Engine failed to close producer, skipping"
                );
                sc_metrics::record_engine_close_failure("producer");
                false
            }
        }
    }

    async fn close_transport_on_engine(&self, transport_id: TransportId) -> bool {
        match self.engine.close_transport(transport_id).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    target: "sc.teardown",
                    transport_id = %transport_id,
                    error = %e,
                    "Engine failed to close transport, skipping"
                );
                sc_metrics::record_engine_close_failure("transport");
                false
            }
        }
    }
}
