//! Actor metrics and mailbox monitoring.
//!
//! Each mailbox has a high-water mark. Crossing it logs a warning once and
//! dropping back below it logs once more. Only the registry depth is
//! exported as a gauge.
//!
//! | Mailbox | High water |
//! |---------|------------|
//! | Registry actor | 500 |
//! | Connection outbound queue | 128 |

use crate::observability::metrics as sc_metrics;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

pub const REGISTRY_MAILBOX_HIGH_WATER: usize = 500;
pub const CONNECTION_MAILBOX_HIGH_WATER: usize = 128;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// `RegistryActor` (singleton).
    Registry,
    /// Outbound writer of one signaling connection.
    Connection,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Registry => "registry",
            ActorType::Connection => "connection",
        }
    }

    #[must_use]
    pub const fn high_water(&self) -> usize {
        match self {
            ActorType::Registry => REGISTRY_MAILBOX_HIGH_WATER,
            ActorType::Connection => CONNECTION_MAILBOX_HIGH_WATER,
        }
    }
}

/// Samples the queue depth of one mailbox.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    owner: String,
    depth: AtomicUsize,
    above_high_water: AtomicBool,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, owner: impl Into<String>) -> Self {
        Self {
            actor_type,
            owner: owner.into(),
            depth: AtomicUsize::new(0),
            above_high_water: AtomicBool::new(false),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Record the depth seen when a message was taken off the queue.
    pub fn observe(&self, depth: usize) {
        self.depth.store(depth, Ordering::Relaxed);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);

        let above = depth > self.actor_type.high_water();
        if self.above_high_water.swap(above, Ordering::Relaxed) == above {
            return;
        }
        if above {
            warn!(
                target: "sc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                owner = %self.owner,
                depth,
                high_water = self.actor_type.high_water(),
                "Mailbox above high water"
            );
        } else {
            info!(
                target: "sc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                owner = %self.owner,
                depth,
                "Mailbox back below high water"
            );
        }
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_above_high_water(&self) -> bool {
        self.above_high_water.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }
}

/// Process-wide counters shared by the registry actor and connection tasks.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    active_connections: AtomicUsize,
    actor_panics: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                Some(c.saturating_sub(1))
            });
    }

    /// Count a panicked actor or request task.
    pub fn record_panic(&self, actor_type: ActorType) {
        let total = self.actor_panics.fetch_add(1, Ordering::Relaxed) + 1;
        error!(
            target: "sc.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = total,
            "Actor panic detected"
        );
        sc_metrics::record_actor_panic(actor_type.as_str());
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn panic_count(&self) -> u64 {
        self.actor_panics.load(Ordering::Relaxed)
    }
}
