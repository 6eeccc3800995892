//! Integration tests for folding engine events into coordinator state.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sc_test_utils::{client_dtls, opus_rtp, test_listen_config, MockEngine};
use signaling_coordinator::coordinator::Coordinator;
use signaling_coordinator::engine::{
    DtlsState, EngineError, EngineEvent, MediaEngine, ENGINE_EVENT_BUFFER,
};
use signaling_coordinator::errors::ScError;
use signaling_coordinator::observability::HealthState;
use signaling_coordinator::signaling::{SignalingDispatcher, SignalingRequest, SignalingResponse};
use signaling_coordinator::types::{MediaKind, ProducerId, SessionPhase, TransportId};

/// Poll `check` until it holds or two seconds pass.
async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

fn start(engine: &Arc<MockEngine>) -> (Coordinator, Arc<HealthState>) {
    let health = Arc::new(HealthState::new());
    health.set_ready();
    let coordinator = Coordinator::new(
        "sc-events",
        engine.clone(),
        test_listen_config(),
        Arc::clone(&health),
    );
    (coordinator, health)
}

async fn create(dispatcher: &SignalingDispatcher) -> TransportId {
    match dispatcher
        .dispatch(SignalingRequest::CreateWebRtcTransport)
        .await
        .unwrap()
    {
        SignalingResponse::TransportCreated { params } => params.id,
        other => panic!("unexpected response: {other:?}"),
    }
}

async fn connect_and_produce(
    dispatcher: &SignalingDispatcher,
    transport_id: TransportId,
) -> ProducerId {
    dispatcher
        .dispatch(SignalingRequest::ConnectTransport {
            transport_id: transport_id.to_string(),
            dtls_parameters: client_dtls(),
        })
        .await
        .unwrap();
    match dispatcher
        .dispatch(SignalingRequest::Produce {
            transport_id: transport_id.to_string(),
            kind: MediaKind::Audio,
            rtp_parameters: opus_rtp(),
        })
        .await
        .unwrap()
    {
        SignalingResponse::Produced { id } => id,
        other => panic!("unexpected response: {other:?}"),
    }
}

async fn session_transports(coordinator: &Coordinator, dispatcher: &SignalingDispatcher) -> usize {
    coordinator
        .registry()
        .get_session(dispatcher.session_id())
        .await
        .unwrap()
        .map_or(0, |snapshot| snapshot.transports.len())
}

#[tokio::test]
async fn test_dtls_connected_event_makes_session_ready() {
    let engine = MockEngine::builder().build();
    let (coordinator, _health) = start(&engine);
    let session = coordinator.open_session().await.unwrap();
    let transport_id = create(&session).await;
    assert_eq!(session.phase().await.unwrap(), SessionPhase::Negotiating);

    engine.emit(EngineEvent::DtlsStateChanged {
        transport_id,
        state: DtlsState::Connected,
    });

    let session_ref = &session;
    eventually("session ready", move || async move {
        session_ref.phase().await.unwrap() == SessionPhase::Ready
    })
    .await;

    // A late `connecting` never downgrades a connected transport.
    engine.emit(EngineEvent::DtlsStateChanged {
        transport_id,
        state: DtlsState::Connecting,
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.phase().await.unwrap(), SessionPhase::Ready);

    coordinator.close();
}

#[tokio::test]
async fn test_dtls_connected_event_racing_connect_request() {
    let engine = MockEngine::builder().emit_dtls_on_connect().build();
    let (coordinator, _health) = start(&engine);
    let session = coordinator.open_session().await.unwrap();
    let transport_id = create(&session).await;

    let producer_id = connect_and_produce(&session, transport_id).await;

    let producer = coordinator
        .registry()
        .get_producer(producer_id)
        .await
        .unwrap();
    assert_eq!(producer.transport_id, transport_id);
    assert_eq!(session.phase().await.unwrap(), SessionPhase::Ready);

    coordinator.close();
}

#[tokio::test]
async fn test_transport_closed_event_cascades_producers() {
    let engine = MockEngine::builder().build();
    let (coordinator, _health) = start(&engine);
    let session = coordinator.open_session().await.unwrap();
    let transport_id = create(&session).await;
    let producer_id = connect_and_produce(&session, transport_id).await;

    engine.emit(EngineEvent::TransportClosed { transport_id });

    let (coordinator_ref, session_ref) = (&coordinator, &session);
    eventually("transport released", move || async move {
        session_transports(coordinator_ref, session_ref).await == 0
    })
    .await;

    assert!(matches!(
        coordinator.registry().get_producer(producer_id).await,
        Err(ScError::ProducerNotFound(_))
    ));
    // The engine closed it itself; nothing to close back.
    assert!(engine.close_calls().is_empty());
    assert_eq!(session.phase().await.unwrap(), SessionPhase::Idle);

    // Teardown afterwards has nothing left to close.
    let report = session.disconnect().await.unwrap().unwrap();
    assert_eq!(report.transports_closed, 0);

    coordinator.close();
}

#[tokio::test]
async fn test_dtls_closed_event_closes_transport_on_engine() {
    let engine = MockEngine::builder().build();
    let (coordinator, _health) = start(&engine);
    let session = coordinator.open_session().await.unwrap();
    let transport_id = create(&session).await;

    engine.emit(EngineEvent::DtlsStateChanged {
        transport_id,
        state: DtlsState::Closed,
    });

    let engine_ref = &engine;
    eventually("engine asked to close transport", move || async move {
        engine_ref.closed_transports() == vec![transport_id]
    })
    .await;
    assert_eq!(session_transports(&coordinator, &session).await, 0);

    coordinator.close();
}

#[tokio::test]
async fn test_dtls_failed_event_releases_transport() {
    let engine = MockEngine::builder().build();
    let (coordinator, _health) = start(&engine);
    let session = coordinator.open_session().await.unwrap();
    let transport_id = create(&session).await;

    engine.emit(EngineEvent::DtlsStateChanged {
        transport_id,
        state: DtlsState::Failed,
    });

    let (coordinator_ref, session_ref) = (&coordinator, &session);
    eventually("transport released", move || async move {
        session_transports(coordinator_ref, session_ref).await == 0
    })
    .await;

    let err = session
        .dispatch(SignalingRequest::ConnectTransport {
            transport_id: transport_id.to_string(),
            dtls_parameters: client_dtls(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ScError::TransportNotFound(_)));

    coordinator.close();
}

#[tokio::test]
async fn test_producer_closed_event_removes_producer_only() {
    let engine = MockEngine::builder().build();
    let (coordinator, _health) = start(&engine);
    let session = coordinator.open_session().await.unwrap();
    let transport_id = create(&session).await;
    let producer_id = connect_and_produce(&session, transport_id).await;

    engine.emit(EngineEvent::ProducerClosed { producer_id });

    let coordinator_ref = &coordinator;
    eventually("producer released", move || async move {
        coordinator_ref.status().await.unwrap().producers == 0
    })
    .await;
    assert_eq!(session_transports(&coordinator, &session).await, 1);

    let snapshot = coordinator
        .registry()
        .get_session(session.session_id())
        .await
        .unwrap()
        .unwrap();
    assert!(snapshot.producers.is_empty());

    coordinator.close();
}

#[tokio::test]
async fn test_events_for_unknown_resources_are_ignored() {
    let engine = MockEngine::builder().build();
    let (coordinator, health) = start(&engine);

    engine.emit(EngineEvent::TransportClosed {
        transport_id: TransportId::new(),
    });
    engine.emit(EngineEvent::ProducerClosed {
        producer_id: ProducerId::new(),
    });
    engine.emit(EngineEvent::DtlsStateChanged {
        transport_id: TransportId::new(),
        state: DtlsState::Connected,
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(coordinator.is_accepting());
    assert!(health.is_ready());
    assert!(engine.close_calls().is_empty());

    coordinator.close();
}

#[tokio::test]
async fn test_worker_death_is_fatal() {
    let engine = MockEngine::builder().build();
    let (coordinator, health) = start(&engine);
    let session = coordinator.open_session().await.unwrap();
    let connection_token = coordinator.connection_token();
    let mut fatal = coordinator.subscribe_fatal();

    engine.kill_worker("worker exited with code 42");

    tokio::time::timeout(Duration::from_secs(2), fatal.changed())
        .await
        .expect("fatal notification")
        .unwrap();
    assert_eq!(
        coordinator.fatal_reason().as_deref(),
        Some("worker exited with code 42")
    );

    assert!(connection_token.is_cancelled());
    assert!(!coordinator.is_accepting());
    assert!(!health.is_live());
    assert!(!health.is_ready());
    assert!(matches!(
        coordinator.open_session().await,
        Err(ScError::EngineUnavailable(_))
    ));

    // Existing sessions can still be released while the process winds down.
    assert!(session.disconnect().await.unwrap().is_some());

    coordinator.close();
}

#[tokio::test]
async fn test_transport_closed_before_commit_is_never_registered() {
    let engine = MockEngine::builder()
        .gate_create()
        .close_new_transports()
        .build();
    let (coordinator, _health) = start(&engine);
    let session = coordinator.open_session().await.unwrap();

    let pending = {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .dispatch(SignalingRequest::CreateWebRtcTransport)
                .await
        })
    };

    // TransportClosed is already out; let the event pump apply it before
    // the create is allowed to commit.
    engine.wait_for_create().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.release_create();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, ScError::TransportNotFound(_)));
    assert_eq!(engine.closed_transports().len(), 1);

    let status = coordinator.status().await.unwrap();
    assert_eq!((status.transports, status.producers), (0, 0));
    assert_eq!(session.phase().await.unwrap(), SessionPhase::Idle);

    coordinator.close();
}

#[tokio::test]
async fn test_producer_closed_before_commit_is_never_registered() {
    let engine = MockEngine::builder()
        .gate_produce()
        .close_new_producers()
        .build();
    let (coordinator, _health) = start(&engine);
    let session = coordinator.open_session().await.unwrap();
    let transport_id = create(&session).await;
    session
        .dispatch(SignalingRequest::ConnectTransport {
            transport_id: transport_id.to_string(),
            dtls_parameters: client_dtls(),
        })
        .await
        .unwrap();

    let pending = {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .dispatch(SignalingRequest::Produce {
                    transport_id: transport_id.to_string(),
                    kind: MediaKind::Audio,
                    rtp_parameters: opus_rtp(),
                })
                .await
        })
    };

    engine.wait_for_produce().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.release_produce();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, ScError::ProducerNotFound(_)));
    assert_eq!(engine.closed_producers().len(), 1);

    let snapshot = coordinator
        .registry()
        .get_session(session.session_id())
        .await
        .unwrap()
        .unwrap();
    assert!(snapshot.producers.is_empty());
    assert_eq!(snapshot.transports, vec![transport_id]);
    assert_eq!(coordinator.status().await.unwrap().producers, 0);

    coordinator.close();
}

#[tokio::test]
async fn test_produce_resolving_after_transport_closed_is_an_orphan() {
    let engine = MockEngine::builder().gate_produce().build();
    let (coordinator, _health) = start(&engine);
    let session = coordinator.open_session().await.unwrap();
    let transport_id = create(&session).await;
    session
        .dispatch(SignalingRequest::ConnectTransport {
            transport_id: transport_id.to_string(),
            dtls_parameters: client_dtls(),
        })
        .await
        .unwrap();

    let pending = {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .dispatch(SignalingRequest::Produce {
                    transport_id: transport_id.to_string(),
                    kind: MediaKind::Audio,
                    rtp_parameters: opus_rtp(),
                })
                .await
        })
    };
    engine.wait_for_produce().await;

    engine.emit(EngineEvent::TransportClosed { transport_id });
    let registry_ref = coordinator.registry();
    let session_id = session.session_id();
    eventually("transport released", move || async move {
        registry_ref
            .get_session(session_id)
            .await
            .unwrap()
            .is_some_and(|s| s.transports.is_empty())
    })
    .await;

    engine.release_produce();
    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, ScError::TransportNotFound(_)));

    assert_eq!(engine.closed_producers().len(), 1);
    let status = coordinator.status().await.unwrap();
    assert_eq!((status.transports, status.producers), (0, 0));

    coordinator.close();
}

#[tokio::test]
async fn test_lagged_event_stream_reconciles_with_engine() {
    let engine = MockEngine::builder().build();
    let (coordinator, health) = start(&engine);
    let session = coordinator.open_session().await.unwrap();
    let transport_id = create(&session).await;
    connect_and_produce(&session, transport_id).await;

    // Closed engine-side; the closure notice is lost in the overflow below.
    engine.close_transport(transport_id).await.unwrap();
    for _ in 0..ENGINE_EVENT_BUFFER + 16 {
        engine.emit(EngineEvent::DtlsStateChanged {
            transport_id: TransportId::new(),
            state: DtlsState::New,
        });
    }

    let coordinator_ref = &coordinator;
    eventually("registry reconciled", move || async move {
        let status = coordinator_ref.status().await.unwrap();
        status.transports == 0 && status.producers == 0
    })
    .await;

    assert_eq!(session.phase().await.unwrap(), SessionPhase::Idle);
    assert!(health.is_live());
    assert!(coordinator.is_accepting());

    coordinator.close();
}

#[tokio::test]
async fn test_engine_unavailable_request_is_fatal() {
    let engine = MockEngine::builder()
        .fail_create(EngineError::Unavailable("worker pipe closed".to_string()))
        .build();
    let (coordinator, health) = start(&engine);
    let session = coordinator.open_session().await.unwrap();
    let connection_token = coordinator.connection_token();

    let err = session
        .dispatch(SignalingRequest::CreateWebRtcTransport)
        .await
        .unwrap_err();
    assert!(matches!(err, ScError::EngineUnavailable(_)));
    assert!(err.is_fatal());

    assert!(coordinator
        .fatal_reason()
        .is_some_and(|reason| reason.contains("worker pipe closed")));
    assert!(connection_token.is_cancelled());
    assert!(!coordinator.is_accepting());
    assert!(!health.is_live());
    assert!(matches!(
        coordinator.open_session().await,
        Err(ScError::EngineUnavailable(_))
    ));

    coordinator.close();
}
