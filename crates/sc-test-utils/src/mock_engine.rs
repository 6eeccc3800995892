//! Mock media engine for coordinator testing.
//!
//! `MockEngine` implements [`MediaEngine`] in memory and can be configured to:
//! - Fail any engine operation with a chosen [`EngineError`]
//! - Hold `create_webrtc_transport` or `produce` until the test releases it,
//!   oldest or newest call first
//! - Close new transports or producers engine-side before the create returns,
//!   emitting the matching closure event
//! - Emit arbitrary [`EngineEvent`]s, including worker death
//!
//! Every close call is recorded so tests can assert what the coordinator
//! released and in which order.
//!
//! # Example
//!
//! ```rust,ignore
//! use sc_test_utils::MockEngine;
//!
//! let engine = MockEngine::builder()
//!     .fail_connect(EngineError::InvalidDtlsParameters("bad fingerprint".into()))
//!     .build();
//! ```

use async_trait::async_trait;
use signaling_coordinator::capabilities::{default_media_codecs, RtpCapabilities};
use signaling_coordinator::engine::params::{
    DtlsFingerprint, DtlsParameters, DtlsRole, IceCandidate, IceParameters, IceProtocol,
    RtpParameters,
};
use signaling_coordinator::engine::{
    DtlsState, EngineDump, EngineError, EngineEvent, EngineProducer, EngineTransport,
    MediaEngine, TransportListenConfig, ENGINE_EVENT_BUFFER,
};
use signaling_coordinator::types::{MediaKind, ProducerId, TransportId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, oneshot, Notify};

/// A close call received by the mock, in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCall {
    Transport(TransportId),
    Producer(ProducerId),
}

#[derive(Debug, Default)]
struct MockState {
    transports: HashSet<TransportId>,
    connected: HashSet<TransportId>,
    producers: HashMap<ProducerId, TransportId>,
    closes: Vec<CloseCall>,
    create_calls: usize,
}

/// Holds engine calls until the test lets them through, in any order.
#[derive(Default)]
struct Gate {
    waiting: Mutex<Vec<oneshot::Sender<()>>>,
    entered: Notify,
}

impl Gate {
    async fn pass(&self) {
        let (tx, rx) = oneshot::channel();
        self.waiting.lock().unwrap().push(tx);
        self.entered.notify_waiters();
        let _ = rx.await;
    }

    async fn wait_for(&self, calls: usize) {
        loop {
            let entered = self.entered.notified();
            if self.waiting.lock().unwrap().len() >= calls {
                return;
            }
            entered.await;
        }
    }

    fn release_oldest(&self) {
        let mut waiting = self.waiting.lock().unwrap();
        if !waiting.is_empty() {
            let _ = waiting.remove(0).send(());
        }
    }

    fn release_newest(&self) {
        if let Some(tx) = self.waiting.lock().unwrap().pop() {
            let _ = tx.send(());
        }
    }
}

/// Mock media engine.
pub struct MockEngine {
    capabilities: Arc<RtpCapabilities>,
    events: broadcast::Sender<EngineEvent>,
    state: Mutex<MockState>,
    create_gate: Option<Gate>,
    produce_gate: Option<Gate>,
    fail_create: Option<EngineError>,
    fail_connect: Option<EngineError>,
    fail_produce: Option<EngineError>,
    fail_close: Option<EngineError>,
    emit_dtls_on_connect: bool,
    close_new_transports: bool,
    close_new_producers: bool,
}

impl MockEngine {
    /// Create a new MockEngine builder.
    #[must_use]
    pub fn builder() -> MockEngineBuilder {
        MockEngineBuilder::default()
    }

    /// Publish an engine event to every subscriber.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    /// Report the engine worker as dead.
    pub fn kill_worker(&self, reason: impl Into<String>) {
        self.emit(EngineEvent::WorkerDied {
            reason: reason.into(),
        });
    }

    /// Wait until a gated `create_webrtc_transport` call is held.
    pub async fn wait_for_create(&self) {
        self.wait_for_creates(1).await;
    }

    /// Wait until `calls` gated `create_webrtc_transport` calls are held.
    pub async fn wait_for_creates(&self, calls: usize) {
        if let Some(gate) = &self.create_gate {
            gate.wait_for(calls).await;
        }
    }

    /// Let the oldest held `create_webrtc_transport` call complete.
    pub fn release_create(&self) {
        if let Some(gate) = &self.create_gate {
            gate.release_oldest();
        }
    }

    /// Let the most recent held `create_webrtc_transport` call complete.
    pub fn release_latest_create(&self) {
        if let Some(gate) = &self.create_gate {
            gate.release_newest();
        }
    }

    /// Wait until a gated `produce` call is held.
    pub async fn wait_for_produce(&self) {
        self.wait_for_produces(1).await;
    }

    /// Wait until `calls` gated `produce` calls are held.
    pub async fn wait_for_produces(&self, calls: usize) {
        if let Some(gate) = &self.produce_gate {
            gate.wait_for(calls).await;
        }
    }

    /// Let the oldest held `produce` call complete.
    pub fn release_produce(&self) {
        if let Some(gate) = &self.produce_gate {
            gate.release_oldest();
        }
    }

    /// Let the most recent held `produce` call complete.
    pub fn release_latest_produce(&self) {
        if let Some(gate) = &self.produce_gate {
            gate.release_newest();
        }
    }

    /// Number of `create_webrtc_transport` calls received.
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.state.lock().unwrap().create_calls
    }

    /// Every close call received, in order.
    #[must_use]
    pub fn close_calls(&self) -> Vec<CloseCall> {
        self.state.lock().unwrap().closes.clone()
    }

    /// Transports closed through `close_transport`, in order.
    #[must_use]
    pub fn closed_transports(&self) -> Vec<TransportId> {
        self.close_calls()
            .into_iter()
            .filter_map(|call| match call {
                CloseCall::Transport(id) => Some(id),
                CloseCall::Producer(_) => None,
            })
            .collect()
    }

    /// Producers closed through `close_producer`, in order.
    #[must_use]
    pub fn closed_producers(&self) -> Vec<ProducerId> {
        self.close_calls()
            .into_iter()
            .filter_map(|call| match call {
                CloseCall::Producer(id) => Some(id),
                CloseCall::Transport(_) => None,
            })
            .collect()
    }

    /// Transports the engine still holds open.
    #[must_use]
    pub fn open_transport_count(&self) -> usize {
        self.state.lock().unwrap().transports.len()
    }

    /// Producers the engine still holds open.
    #[must_use]
    pub fn open_producer_count(&self) -> usize {
        self.state.lock().unwrap().producers.len()
    }

    fn transport_parameters(id: TransportId, listen: &TransportListenConfig) -> EngineTransport {
        let ip = listen
            .announced_ip
            .clone()
            .unwrap_or_else(|| listen.listen_ip.clone());
        EngineTransport {
            id,
            ice_parameters: IceParameters {
                username_fragment: "mockufrag".to_string(),
                password: "mockpassword".to_string(),
                ice_lite: true,
            },
            ice_candidates: vec![IceCandidate {
                foundation: "udpcandidate".to_string(),
                priority: 1_076_302_079,
                ip,
                protocol: IceProtocol::Udp,
                port: listen.rtc_min_port,
                candidate_type: "host".to_string(),
                tcp_type: None,
            }],
            dtls_parameters: DtlsParameters {
                role: DtlsRole::Auto,
                fingerprints: vec![DtlsFingerprint {
                    algorithm: "sha-256".to_string(),
                    value: "00:11:22:33".to_string(),
                }],
            },
        }
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    fn router_rtp_capabilities(&self) -> Arc<RtpCapabilities> {
        Arc::clone(&self.capabilities)
    }

    async fn create_webrtc_transport(
        &self,
        listen: &TransportListenConfig,
    ) -> Result<EngineTransport, EngineError> {
        self.state.lock().unwrap().create_calls += 1;

        let id = TransportId::new();
        if self.close_new_transports {
            self.emit(EngineEvent::TransportClosed { transport_id: id });
        }
        if let Some(gate) = &self.create_gate {
            gate.pass().await;
        }
        if let Some(err) = &self.fail_create {
            return Err(err.clone());
        }

        if !self.close_new_transports {
            self.state.lock().unwrap().transports.insert(id);
        }
        Ok(Self::transport_parameters(id, listen))
    }

    async fn connect_transport(
        &self,
        transport_id: TransportId,
        _dtls_parameters: &DtlsParameters,
    ) -> Result<(), EngineError> {
        if let Some(err) = &self.fail_connect {
            return Err(err.clone());
        }
        {
            let mut state = self.state.lock().unwrap();
            if !state.transports.contains(&transport_id) {
                return Err(EngineError::UnknownResource(transport_id.to_string()));
            }
            state.connected.insert(transport_id);
        }
        if self.emit_dtls_on_connect {
            self.emit(EngineEvent::DtlsStateChanged {
                transport_id,
                state: DtlsState::Connected,
            });
        }
        Ok(())
    }

    async fn produce(
        &self,
        transport_id: TransportId,
        kind: MediaKind,
        _rtp_parameters: &RtpParameters,
    ) -> Result<EngineProducer, EngineError> {
        if let Some(err) = &self.fail_produce {
            return Err(err.clone());
        }
        let id = {
            let mut state = self.state.lock().unwrap();
            if !state.connected.contains(&transport_id) {
                return Err(EngineError::UnknownResource(transport_id.to_string()));
            }
            let id = ProducerId::new();
            state.producers.insert(id, transport_id);
            id
        };
        if self.close_new_producers {
            self.state.lock().unwrap().producers.remove(&id);
            self.emit(EngineEvent::ProducerClosed { producer_id: id });
        }
        if let Some(gate) = &self.produce_gate {
            gate.pass().await;
        }
        Ok(EngineProducer { id, kind })
    }

    async fn close_transport(&self, transport_id: TransportId) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.closes.push(CloseCall::Transport(transport_id));
        if let Some(err) = &self.fail_close {
            return Err(err.clone());
        }
        state.transports.remove(&transport_id);
        state.connected.remove(&transport_id);
        state.producers.retain(|_, owner| *owner != transport_id);
        Ok(())
    }

    async fn close_producer(&self, producer_id: ProducerId) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.closes.push(CloseCall::Producer(producer_id));
        if let Some(err) = &self.fail_close {
            return Err(err.clone());
        }
        state.producers.remove(&producer_id);
        Ok(())
    }

    async fn dump(&self) -> Result<EngineDump, EngineError> {
        let state = self.state.lock().unwrap();
        Ok(EngineDump {
            transports: state.transports.clone(),
            producers: state.producers.keys().copied().collect(),
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

/// Builder for MockEngine configuration.
#[derive(Debug, Default)]
pub struct MockEngineBuilder {
    gate_create: bool,
    gate_produce: bool,
    close_new_transports: bool,
    close_new_producers: bool,
    fail_create: Option<EngineError>,
    fail_connect: Option<EngineError>,
    fail_produce: Option<EngineError>,
    fail_close: Option<EngineError>,
    emit_dtls_on_connect: bool,
}

impl MockEngineBuilder {
    /// Hold every `create_webrtc_transport` call until
    /// [`MockEngine::release_create`].
    #[must_use]
    pub fn gate_create(mut self) -> Self {
        self.gate_create = true;
        self
    }

    /// Hold every `produce` call, after the producer exists engine-side,
    /// until [`MockEngine::release_produce`].
    #[must_use]
    pub fn gate_produce(mut self) -> Self {
        self.gate_produce = true;
        self
    }

    /// Close every new transport engine-side before the create returns (and
    /// before any gate), emitting `TransportClosed`.
    #[must_use]
    pub fn close_new_transports(mut self) -> Self {
        self.close_new_transports = true;
        self
    }

    /// Close every new producer engine-side before `produce` returns (and
    /// before any gate), emitting `ProducerClosed`.
    #[must_use]
    pub fn close_new_producers(mut self) -> Self {
        self.close_new_producers = true;
        self
    }

    #[must_use]
    pub fn fail_create(mut self, err: EngineError) -> Self {
        self.fail_create = Some(err);
        self
    }

    #[must_use]
    pub fn fail_connect(mut self, err: EngineError) -> Self {
        self.fail_connect = Some(err);
        self
    }

    #[must_use]
    pub fn fail_produce(mut self, err: EngineError) -> Self {
        self.fail_produce = Some(err);
        self
    }

    /// Fail every close call (the call is still recorded).
    #[must_use]
    pub fn fail_close(mut self, err: EngineError) -> Self {
        self.fail_close = Some(err);
        self
    }

    /// Emit `DtlsStateChanged(connected)` after a successful connect.
    #[must_use]
    pub fn emit_dtls_on_connect(mut self) -> Self {
        self.emit_dtls_on_connect = true;
        self
    }

    /// Build the MockEngine.
    #[must_use]
    pub fn build(self) -> Arc<MockEngine> {
        let (events, _) = broadcast::channel(ENGINE_EVENT_BUFFER);
        Arc::new(MockEngine {
            capabilities: Arc::new(RtpCapabilities::from_catalog(default_media_codecs())),
            events,
            state: Mutex::new(MockState::default()),
            create_gate: self.gate_create.then(Gate::default),
            produce_gate: self.gate_produce.then(Gate::default),
            fail_create: self.fail_create,
            fail_connect: self.fail_connect,
            fail_produce: self.fail_produce,
            fail_close: self.fail_close,
            emit_dtls_on_connect: self.emit_dtls_on_connect,
            close_new_transports: self.close_new_transports,
            close_new_producers: self.close_new_producers,
        })
    }
}
