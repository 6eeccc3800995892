//! End-to-end tests for the WebSocket signaling endpoint.
//!
//! Serves `signaling_router` on an ephemeral port backed by the local
//! reference engine and drives it with a real WebSocket client.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use sc_test_utils::{opus_rtp, test_listen_config, unknown_transport_id, FrameBuilder};
use serde_json::Value;
use signaling_coordinator::capabilities::{default_media_codecs, RtpCapabilities};
use signaling_coordinator::coordinator::Coordinator;
use signaling_coordinator::engine::LocalEngine;
use signaling_coordinator::observability::HealthState;
use signaling_coordinator::signaling::signaling_router;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    coordinator: Coordinator,
    engine: Arc<LocalEngine>,
}

impl TestServer {
    async fn start() -> Self {
        let engine = Arc::new(
            LocalEngine::new(RtpCapabilities::from_catalog(default_media_codecs())).unwrap(),
        );
        let health = Arc::new(HealthState::new());
        health.set_ready();
        let coordinator = Coordinator::new(
            "sc-ws-test",
            engine.clone(),
            test_listen_config(),
            health,
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = signaling_router(coordinator.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            coordinator,
            engine,
        }
    }

    async fn connect(&self) -> Client {
        let (client, _) = connect_async(format!("ws://{}/ws", self.addr))
            .await
            .expect("WebSocket handshake");
        client
    }

    async fn wait_for_sessions(&self, expected: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let status = self.coordinator.status().await.unwrap();
            if status.sessions == expected {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {expected} sessions, have {}",
                status.sessions
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Send a frame and wait for the ack carrying its id.
async fn request(client: &mut Client, (id, frame): (u64, String)) -> Value {
    client.send(Message::Text(frame)).await.unwrap();
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("ack timed out")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = message {
            let ack: Value = serde_json::from_str(&text).unwrap();
            if ack["id"].as_u64() == Some(id) {
                return ack["data"].clone();
            }
        }
    }
}

#[tokio::test]
async fn test_full_signaling_flow() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    let mut frames = FrameBuilder::new();

    let caps = request(&mut client, frames.get_router_rtp_capabilities()).await;
    let codecs = caps["rtpCapabilities"]["codecs"].as_array().unwrap();
    assert!(codecs
        .iter()
        .any(|codec| codec["mimeType"].as_str() == Some("audio/opus")));

    let created = request(&mut client, frames.create_webrtc_transport()).await;
    let params = &created["params"];
    let transport_id = params["id"].as_str().unwrap().to_string();
    assert!(params["iceParameters"]["usernameFragment"].is_string());
    assert!(!params["iceCandidates"].as_array().unwrap().is_empty());
    assert_eq!(params["dtlsParameters"]["fingerprints"][0]["algorithm"], "sha-256");

    let connected = request(&mut client, frames.connect_transport(&transport_id)).await;
    assert_eq!(connected["success"], true);

    let produced = request(
        &mut client,
        frames.produce(&transport_id, "audio", &opus_rtp()),
    )
    .await;
    let producer_id = produced["id"].as_str().unwrap();
    assert_ne!(producer_id, transport_id);
    assert_eq!(server.engine.open_producer_count(), 1);
    let status = server.coordinator.status().await.unwrap();
    assert_eq!((status.sessions, status.transports, status.producers), (1, 1, 1));

    // Closing the socket releases everything the session created.
    client.close(None).await.unwrap();
    server.wait_for_sessions(0).await;
    assert_eq!(server.engine.open_transport_count(), 0);
    assert_eq!(server.engine.open_producer_count(), 0);
    let status = server.coordinator.status().await.unwrap();
    assert_eq!((status.sessions, status.transports, status.producers), (0, 0, 0));

    server.coordinator.close();
}

#[tokio::test]
async fn test_errors_are_acked_with_message() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    let mut frames = FrameBuilder::new();

    let unknown = unknown_transport_id();
    let ack = request(&mut client, frames.produce(&unknown, "audio", &opus_rtp())).await;
    assert_eq!(
        ack["error"],
        format!("transport with id \"{unknown}\" not found")
    );

    let ack = request(
        &mut client,
        frames.frame("subscribe", serde_json::json!({})),
    )
    .await;
    assert!(ack["error"].as_str().unwrap().contains("subscribe"));

    // Malformed payload for a known event still gets an ack by id.
    let ack = request(
        &mut client,
        frames.frame("connectTransport", serde_json::json!({ "transportId": 7 })),
    )
    .await;
    assert!(ack["error"].is_string());

    server.coordinator.close();
}

#[tokio::test]
async fn test_frames_without_id_are_ignored() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    let mut frames = FrameBuilder::new();

    client
        .send(Message::Text(
            r#"{"event":"createWebRtcTransport","data":{}}"#.to_string(),
        ))
        .await
        .unwrap();
    client
        .send(Message::Text("not json at all".to_string()))
        .await
        .unwrap();

    // The next ack on the socket belongs to the next identified request.
    let caps = request(&mut client, frames.get_router_rtp_capabilities()).await;
    assert!(caps["rtpCapabilities"].is_object());
    assert_eq!(server.coordinator.status().await.unwrap().transports, 0);

    server.coordinator.close();
}

#[tokio::test]
async fn test_sessions_are_isolated_across_connections() {
    let server = TestServer::start().await;
    let mut alice = server.connect().await;
    let mut bob = server.connect().await;
    let mut alice_frames = FrameBuilder::new();
    let mut bob_frames = FrameBuilder::new();

    let created = request(&mut alice, alice_frames.create_webrtc_transport()).await;
    let transport_id = created["params"]["id"].as_str().unwrap().to_string();

    let ack = request(&mut bob, bob_frames.connect_transport(&transport_id)).await;
    assert_eq!(
        ack["error"],
        format!("transport with id \"{transport_id}\" not found")
    );

    server.wait_for_sessions(2).await;
    bob.close(None).await.unwrap();
    server.wait_for_sessions(1).await;
    assert_eq!(server.engine.open_transport_count(), 1);

    alice.close(None).await.unwrap();
    server.wait_for_sessions(0).await;
    assert_eq!(server.engine.open_transport_count(), 0);

    server.coordinator.close();
}

#[tokio::test]
async fn test_shutdown_refuses_new_connections() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    server.wait_for_sessions(1).await;

    server.coordinator.shutdown();

    // Open connections are told to go away and their sessions released.
    server.wait_for_sessions(0).await;
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match client.next().await {
                None | Some(Err(_) | Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "server did not close the socket");

    let refused = connect_async(format!("ws://{}/ws", server.addr)).await;
    assert!(refused.is_err());

    server.coordinator.close();
}
