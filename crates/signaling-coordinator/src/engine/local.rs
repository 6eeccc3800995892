//! `LocalEngine` - in-process reference media engine.
//!
//! Implements the [`MediaEngine`] contract without forwarding any media:
//! it allocates transport ports from the configured range, generates ICE
//! credentials and a DTLS certificate fingerprint, validates client DTLS
//! parameters and checks produced codecs against the router capabilities.
//!
//! It is what the binary runs against when no external SFU worker is wired
//! in, and what end-to-end tests drive.

use super::params::{
    DtlsFingerprint, DtlsParameters, DtlsRole, IceCandidate, IceParameters, IceProtocol,
    RtpParameters,
};
use super::{
    DtlsState, EngineDump, EngineError, EngineEvent, EngineProducer, EngineTransport,
    MediaEngine, TransportListenConfig, ENGINE_EVENT_BUFFER,
};
use crate::capabilities::RtpCapabilities;
use crate::types::{MediaKind, ProducerId, TransportId};

use async_trait::async_trait;
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::debug;

/// Fingerprint algorithms accepted in client DTLS parameters.
const SUPPORTED_FINGERPRINT_ALGORITHMS: [&str; 5] =
    ["sha-1", "sha-224", "sha-256", "sha-384", "sha-512"];

/// ICE candidate priorities (host candidates).
const UDP_PREFERRED_PRIORITY: u32 = 1_076_302_079;
const TCP_PREFERRED_PRIORITY: u32 = 1_076_276_479;
const UNPREFERRED_PRIORITY_PENALTY: u32 = 2_000;

#[derive(Debug)]
struct LocalTransport {
    connected: bool,
    producers: HashSet<ProducerId>,
}

#[derive(Debug, Default)]
struct LocalState {
    transports: HashMap<TransportId, LocalTransport>,
    producers: HashMap<ProducerId, TransportId>,
    next_port_offset: u32,
}

/// In-process reference implementation of [`MediaEngine`].
pub struct LocalEngine {
    capabilities: Arc<RtpCapabilities>,
    state: Mutex<LocalState>,
    events: broadcast::Sender<EngineEvent>,
    rng: SystemRandom,
    /// Fingerprint of the engine's (simulated) DTLS certificate.
    certificate_fingerprint: String,
}

impl LocalEngine {
    /// Create a local engine offering the given router capabilities.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Unavailable` if the system random source fails.
    pub fn new(capabilities: RtpCapabilities) -> Result<Self, EngineError> {
        let rng = SystemRandom::new();
        let mut certificate = [0u8; 32];
        rng.fill(&mut certificate)
            .map_err(|_| EngineError::Unavailable("random source failed".to_string()))?;
        let certificate_fingerprint =
            colon_hex(digest::digest(&digest::SHA256, &certificate).as_ref());

        let (events, _) = broadcast::channel(ENGINE_EVENT_BUFFER);

        Ok(Self {
            capabilities: Arc::new(capabilities),
            state: Mutex::new(LocalState::default()),
            events,
            rng,
            certificate_fingerprint,
        })
    }

    /// Number of transports the engine currently holds open.
    #[must_use]
    pub fn open_transport_count(&self) -> usize {
        self.lock().map(|s| s.transports.len()).unwrap_or(0)
    }

    /// Number of producers the engine currently holds open.
    #[must_use]
    pub fn open_producer_count(&self) -> usize {
        self.lock().map(|s| s.producers.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LocalState>, EngineError> {
        self.state
            .lock()
            .map_err(|_| EngineError::Unavailable("engine state poisoned".to_string()))
    }

    fn random_token(&self, bytes: usize) -> Result<String, EngineError> {
        let mut buf = vec![0u8; bytes];
        self.rng
            .fill(&mut buf)
            .map_err(|_| EngineError::Unavailable("random source failed".to_string()))?;
        Ok(hex::encode(buf))
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl MediaEngine for LocalEngine {
    fn router_rtp_capabilities(&self) -> Arc<RtpCapabilities> {
        Arc::clone(&self.capabilities)
    }

    async fn create_webrtc_transport(
        &self,
        listen: &TransportListenConfig,
    ) -> Result<EngineTransport, EngineError> {
        if !listen.enable_udp && !listen.enable_tcp {
            return Err(EngineError::Rejected(
                "at least one of UDP or TCP must be enabled".to_string(),
            ));
        }
        if listen.rtc_min_port > listen.rtc_max_port {
            return Err(EngineError::Rejected("empty RTC port range".to_string()));
        }

        let ice_parameters = IceParameters {
            username_fragment: self.random_token(8)?,
            password: self.random_token(16)?,
            ice_lite: true,
        };

        let id = TransportId::new();
        let port = {
            let mut state = self.lock()?;
            let span = u32::from(listen.rtc_max_port - listen.rtc_min_port) + 1;
            let offset = state.next_port_offset % span;
            state.next_port_offset = state.next_port_offset.wrapping_add(1);
            state.transports.insert(
                id,
                LocalTransport {
                    connected: false,
                    producers: HashSet::new(),
                },
            );
            // offset < span <= u16 range, so the sum stays within rtc_max_port
            listen
                .rtc_min_port
                .saturating_add(u16::try_from(offset).unwrap_or(0))
        };

        let ip = listen
            .announced_ip
            .clone()
            .unwrap_or_else(|| listen.listen_ip.clone());

        let (udp_priority, tcp_priority) = if listen.prefer_udp {
            (UDP_PREFERRED_PRIORITY, TCP_PREFERRED_PRIORITY - UNPREFERRED_PRIORITY_PENALTY)
        } else {
            (UDP_PREFERRED_PRIORITY - UNPREFERRED_PRIORITY_PENALTY, TCP_PREFERRED_PRIORITY)
        };

        let mut ice_candidates = Vec::new();
        if listen.enable_udp {
            ice_candidates.push(IceCandidate {
                foundation: "udpcandidate".to_string(),
                priority: udp_priority,
                ip: ip.clone(),
                protocol: IceProtocol::Udp,
                port,
                candidate_type: "host".to_string(),
                tcp_type: None,
            });
        }
        if listen.enable_tcp {
            ice_candidates.push(IceCandidate {
                foundation: "tcpcandidate".to_string(),
                priority: tcp_priority,
                ip,
                protocol: IceProtocol::Tcp,
                port,
                candidate_type: "host".to_string(),
                tcp_type: Some("passive".to_string()),
            });
        }

        debug!(
            target: "sc.engine.local",
            transport_id = %id,
            port = port,
            "Transport created"
        );

        Ok(EngineTransport {
            id,
            ice_parameters,
            ice_candidates,
            dtls_parameters: DtlsParameters {
                role: DtlsRole::Auto,
                fingerprints: vec![DtlsFingerprint {
                    algorithm: "sha-256".to_string(),
                    value: self.certificate_fingerprint.clone(),
                }],
            },
        })
    }

    async fn connect_transport(
        &self,
        transport_id: TransportId,
        dtls_parameters: &DtlsParameters,
    ) -> Result<(), EngineError> {
        if dtls_parameters.fingerprints.is_empty() {
            return Err(EngineError::InvalidDtlsParameters(
                "no fingerprints".to_string(),
            ));
        }
        for fingerprint in &dtls_parameters.fingerprints {
            let algorithm = fingerprint.algorithm.to_ascii_lowercase();
            if !SUPPORTED_FINGERPRINT_ALGORITHMS.contains(&algorithm.as_str()) {
                return Err(EngineError::InvalidDtlsParameters(format!(
                    "unsupported fingerprint algorithm {}",
                    fingerprint.algorithm
                )));
            }
            if fingerprint.value.is_empty() {
                return Err(EngineError::InvalidDtlsParameters(
                    "empty fingerprint".to_string(),
                ));
            }
        }

        {
            let mut state = self.lock()?;
            let transport = state
                .transports
                .get_mut(&transport_id)
                .ok_or_else(|| EngineError::UnknownResource(transport_id.to_string()))?;
            if transport.connected {
                return Err(EngineError::Rejected("connect() already called".to_string()));
            }
            transport.connected = true;
        }

        self.emit(EngineEvent::DtlsStateChanged {
            transport_id,
            state: DtlsState::Connecting,
        });
        self.emit(EngineEvent::DtlsStateChanged {
            transport_id,
            state: DtlsState::Connected,
        });

        Ok(())
    }

    async fn produce(
        &self,
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
    ) -> Result<EngineProducer, EngineError> {
        if rtp_parameters.codecs.is_empty() {
            return Err(EngineError::UnsupportedMedia("no codecs".to_string()));
        }
        for codec in &rtp_parameters.codecs {
            let media_prefix = format!("{}/", kind.as_str());
            if !codec.mime_type.to_ascii_lowercase().starts_with(&media_prefix) {
                return Err(EngineError::UnsupportedMedia(format!(
                    "codec {} does not match kind {}",
                    codec.mime_type,
                    kind.as_str()
                )));
            }
            // Retransmission and FEC wrappers ride along with a media codec
            let lower = codec.mime_type.to_ascii_lowercase();
            if lower.ends_with("/rtx") || lower.ends_with("/red") || lower.ends_with("/ulpfec") {
                continue;
            }
            if self
                .capabilities
                .find_codec(kind, &codec.mime_type, codec.clock_rate)
                .is_none()
            {
                return Err(EngineError::UnsupportedMedia(format!(
                    "codec {}/{} not supported by router",
                    codec.mime_type, codec.clock_rate
                )));
            }
        }

        let id = ProducerId::new();
        {
            let mut state = self.lock()?;
            let transport = state
                .transports
                .get_mut(&transport_id)
                .ok_or_else(|| EngineError::UnknownResource(transport_id.to_string()))?;
            if !transport.connected {
                return Err(EngineError::Rejected("transport not connected".to_string()));
            }
            transport.producers.insert(id);
            state.producers.insert(id, transport_id);
        }

        debug!(
            target: "sc.engine.local",
            transport_id = %transport_id,
            producer_id = %id,
            kind = kind.as_str(),
            "Producer created"
        );

        Ok(EngineProducer { id, kind })
    }

    async fn close_transport(&self, transport_id: TransportId) -> Result<(), EngineError> {
        let mut state = self.lock()?;
        if let Some(transport) = state.transports.remove(&transport_id) {
            for producer_id in transport.producers {
                state.producers.remove(&producer_id);
            }
            debug!(
                target: "sc.engine.local",
                transport_id = %transport_id,
                "Transport closed"
            );
        }
        Ok(())
    }

    async fn close_producer(&self, producer_id: ProducerId) -> Result<(), EngineError> {
        let mut state = self.lock()?;
        if let Some(transport_id) = state.producers.remove(&producer_id) {
            if let Some(transport) = state.transports.get_mut(&transport_id) {
                transport.producers.remove(&producer_id);
            }
            debug!(
                target: "sc.engine.local",
                producer_id = %producer_id,
                "Producer closed"
            );
        }
        Ok(())
    }

    async fn dump(&self) -> Result<EngineDump, EngineError> {
        let state = self.lock()?;
        Ok(EngineDump {
            transports: state.transports.keys().copied().collect(),
            producers: state.producers.keys().copied().collect(),
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

/// Format bytes as colon-separated uppercase hex (`AB:CD:...`).
fn colon_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}
