//! Actor layer.
//!
//! ```text
//! RegistryActor (singleton)
//! └── owns Registry { SessionRegistry, ResourceStore }
//!
//! connection task (one per WebSocket)
//! ├── spawns one task per signaling request
//! └── outbound writer fed by an mpsc mailbox
//! ```
//!
//! # Modules
//!
//! - [`registry`] - `RegistryActor` and its handle
//! - [`messages`] - Message types for the registry mailbox
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod messages;
pub mod metrics;
pub mod registry;

pub use messages::RegistryMessage;
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use registry::{RegistryActor, RegistryHandle};
