//! `Lifecycle` - process-wide accepting, shutdown and fatal state.
//!
//! Shared by the [`Coordinator`](crate::coordinator::Coordinator) and every
//! [`SignalingDispatcher`](crate::signaling::SignalingDispatcher), so an
//! `EngineUnavailable` seen by a single request takes the same fatal path as
//! a `WorkerDied` event.

use crate::observability::HealthState;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct Lifecycle {
    coordinator_id: Arc<str>,
    health: Arc<HealthState>,
    accepting: AtomicBool,
    shutdown_token: CancellationToken,
    fatal_tx: watch::Sender<Option<String>>,
}

impl Lifecycle {
    #[must_use]
    pub fn new(coordinator_id: impl Into<Arc<str>>, health: Arc<HealthState>) -> Arc<Self> {
        let (fatal_tx, _) = watch::channel(None);
        Arc::new(Self {
            coordinator_id: coordinator_id.into(),
            health,
            accepting: AtomicBool::new(true),
            shutdown_token: CancellationToken::new(),
            fatal_tx,
        })
    }

    #[must_use]
    pub fn coordinator_id(&self) -> &str {
        &self.coordinator_id
    }

    #[must_use]
    pub fn health(&self) -> &Arc<HealthState> {
        &self.health
    }

    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Token cancelled when connections must wind down.
    #[must_use]
    pub fn connection_token(&self) -> CancellationToken {
        self.shutdown_token.child_token()
    }

    /// Resolves once shutdown (graceful or fatal) has started.
    pub async fn shutdown_started(&self) {
        self.shutdown_token.cancelled().await;
    }

    #[must_use]
    pub fn fatal_reason(&self) -> Option<String> {
        self.fatal_tx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe_fatal(&self) -> watch::Receiver<Option<String>> {
        self.fatal_tx.subscribe()
    }

    /// Stop accepting, mark not ready and cancel connections.
    ///
    /// Returns true on the first call.
    pub fn begin_shutdown(&self) -> bool {
        let first = self.accepting.swap(false, Ordering::SeqCst);
        self.health.set_not_ready();
        self.shutdown_token.cancel();
        first
    }

    /// Enter the fatal path: nothing the engine owned can be recovered.
    ///
    /// Only the first reason is kept.
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let first = self.fatal_tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason.clone());
            true
        });
        if first {
            error!(
                target: "sc.engine",
                coordinator_id = %self.coordinator_id,
                reason = %reason,
                "Media engine unavailable, coordinator is no longer serviceable"
            );
        } else {
            info!(
                target: "sc.engine",
                coordinator_id = %self.coordinator_id,
                reason = %reason,
                "Further engine failure after fatal"
            );
        }
        self.accepting.store(false, Ordering::SeqCst);
        self.health.set_failed();
        self.shutdown_token.cancel();
    }
}
