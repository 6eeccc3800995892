//! Signaling Coordinator (SC) Service Library
//!
//! The signaling coordinator brokers the lifecycle of WebRTC resources between
//! browser clients and a selective-forwarding media engine:
//!
//! - Exposes the router's RTP capabilities to clients
//! - Creates, connects and tears down WebRTC transports per client session
//! - Registers media producers on connected transports
//! - Folds asynchronous engine events (DTLS state, closures, worker death)
//!   into its resource registry
//!
//! # Architecture
//!
//! ```text
//! Coordinator (one per process)
//! ├── RegistryActor (single writer of session and resource state)
//! ├── TeardownCoordinator (ordered producer -> transport release)
//! ├── engine event pump (MediaEngine::subscribe)
//! └── per WebSocket connection
//!     └── SignalingDispatcher (one session, one task per request)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Session scoping**: a session can only reach the transports it created
//! - **Re-validate after await**: every engine call is a suspension point, so
//!   registry commits re-check the session and close orphans it left behind
//! - **Idempotent teardown**: a session is marked closing before any engine
//!   call, so a second disconnect is a no-op
//! - **Engine death is fatal**: a `WorkerDied` event or an `EngineUnavailable`
//!   request error fails the health checks and the process exits
//!
//! # Modules
//!
//! - [`actors`] - Registry actor and mailbox metrics
//! - [`capabilities`] - Codec catalog and router RTP capabilities
//! - [`config`] - Service configuration from environment
//! - [`coordinator`] - Process-wide wiring and engine event handling
//! - [`engine`] - Media engine facade and the local reference engine
//! - [`errors`] - Error types with signaling error codes
//! - [`lifecycle`] - Accepting, shutdown and fatal state
//! - [`observability`] - Health checks and Prometheus metrics
//! - [`registry`] - Session and resource bookkeeping
//! - [`signaling`] - WebSocket protocol and request dispatch
//! - [`teardown`] - Session and resource release
//! - [`types`] - Identifiers and lifecycle states

pub mod actors;
pub mod capabilities;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod errors;
pub mod lifecycle;
pub mod observability;
pub mod registry;
pub mod signaling;
pub mod teardown;
pub mod types;

#[cfg(test)]
mod test_support;
