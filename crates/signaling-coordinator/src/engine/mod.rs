//! Media engine facade.
//!
//! The selective-forwarding media engine is an external collaborator: it owns
//! the RTP/ICE/DTLS machinery and the coordinator only drives it through the
//! [`MediaEngine`] trait. Every trait call is a suspension point; callers must
//! re-validate their own state after awaiting one.
//!
//! The engine also publishes asynchronous [`EngineEvent`]s (DTLS state
//! changes, out-of-band closures, worker death) on a broadcast channel that
//! the coordinator folds into its resource state.
//!
//! # Modules
//!
//! - [`local`] - In-process reference engine used by the binary and tests
//! - [`params`] - ICE/DTLS/RTP parameter types

pub mod local;
pub mod params;

use crate::capabilities::RtpCapabilities;
use crate::types::{MediaKind, ProducerId, TransportId};

use async_trait::async_trait;
use params::{DtlsParameters, IceCandidate, IceParameters, RtpParameters};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

pub use local::LocalEngine;

/// Capacity of the engine event broadcast channel.
pub const ENGINE_EVENT_BUFFER: usize = 1024;

/// Errors reported by the media engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The engine worker is gone; nothing it owned can be recovered.
    #[error("Media engine unavailable: {0}")]
    Unavailable(String),

    /// `connect` rejected the client's DTLS parameters.
    #[error("Invalid DTLS parameters: {0}")]
    InvalidDtlsParameters(String),

    /// `produce` rejected the media kind or RTP parameters.
    #[error("Unsupported media: {0}")]
    UnsupportedMedia(String),

    /// The engine does not know the referenced transport or producer.
    #[error("Unknown engine resource: {0}")]
    UnknownResource(String),

    /// The engine rejected the request for another reason.
    #[error("Engine rejected request: {0}")]
    Rejected(String),
}

/// Network listen parameters for new WebRTC transports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportListenConfig {
    /// Local IP the engine binds to.
    pub listen_ip: String,
    /// Public IP advertised in ICE candidates (defaults to `listen_ip`).
    pub announced_ip: Option<String>,
    /// Lowest RTC port the engine may allocate.
    pub rtc_min_port: u16,
    /// Highest RTC port the engine may allocate.
    pub rtc_max_port: u16,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_udp: bool,
    /// Initial outgoing bitrate estimate in bits per second.
    pub initial_available_outgoing_bitrate: u32,
}

impl Default for TransportListenConfig {
    fn default() -> Self {
        Self {
            listen_ip: "0.0.0.0".to_string(),
            announced_ip: None,
            rtc_min_port: 10000,
            rtc_max_port: 10100,
            enable_udp: true,
            enable_tcp: true,
            prefer_udp: true,
            initial_available_outgoing_bitrate: 1_000_000,
        }
    }
}

/// A transport freshly created by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineTransport {
    pub id: TransportId,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
}

/// A producer freshly created by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineProducer {
    pub id: ProducerId,
    pub kind: MediaKind,
}

/// Resources the engine currently holds open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineDump {
    pub transports: HashSet<TransportId>,
    pub producers: HashSet<ProducerId>,
}

/// DTLS state reported by the engine for a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtlsState {
    New,
    Connecting,
    Connected,
    Failed,
    Closed,
}

impl DtlsState {
    /// Returns the state as a string for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DtlsState::New => "new",
            DtlsState::Connecting => "connecting",
            DtlsState::Connected => "connected",
            DtlsState::Failed => "failed",
            DtlsState::Closed => "closed",
        }
    }
}

/// Asynchronous notification published by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A transport's DTLS state changed.
    DtlsStateChanged {
        transport_id: TransportId,
        state: DtlsState,
    },
    /// A transport closed without the coordinator asking for it.
    TransportClosed { transport_id: TransportId },
    /// A producer closed without the coordinator asking for it.
    ProducerClosed { producer_id: ProducerId },
    /// The engine worker process terminated. Fatal.
    WorkerDied { reason: String },
}

/// Operations the coordinator consumes from the media engine.
///
/// Close operations are idempotent: closing an unknown or already-closed
/// resource succeeds. An `Err` from a close is only ever logged.
#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    /// The router's negotiable codec set. Immutable for the engine's lifetime.
    fn router_rtp_capabilities(&self) -> Arc<RtpCapabilities>;

    /// Create a WebRTC transport.
    async fn create_webrtc_transport(
        &self,
        listen: &TransportListenConfig,
    ) -> Result<EngineTransport, EngineError>;

    /// Apply the client's DTLS parameters to a transport.
    async fn connect_transport(
        &self,
        transport_id: TransportId,
        dtls_parameters: &DtlsParameters,
    ) -> Result<(), EngineError>;

    /// Start receiving a media stream over a transport.
    async fn produce(
        &self,
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
    ) -> Result<EngineProducer, EngineError>;

    /// Close a transport and, engine-side, every producer on it.
    async fn close_transport(&self, transport_id: TransportId) -> Result<(), EngineError>;

    /// Close a producer.
    async fn close_producer(&self, producer_id: ProducerId) -> Result<(), EngineError>;

    /// List every open transport and producer. Used to recover from missed
    /// events.
    async fn dump(&self) -> Result<EngineDump, EngineError>;

    /// Subscribe to engine notifications.
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}
