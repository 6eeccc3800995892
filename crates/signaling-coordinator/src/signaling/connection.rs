//! WebSocket front door: one session per connection.
//!
//! The read loop parses frames and spawns one task per request, so requests
//! complete in any order. Acks go through a bounded mailbox to a single
//! writer task that owns the socket sink. When the socket closes (or the
//! coordinator shuts down) the session is torn down; requests still in
//! flight keep running and close whatever they create as orphans.

use crate::actors::{ActorMetrics, ActorType, MailboxMonitor};
use crate::coordinator::Coordinator;
use crate::errors::ScError;
use crate::observability::metrics as sc_metrics;

use super::dispatcher::SignalingDispatcher;
use super::protocol::{Ack, InboundFrame};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Capacity of a connection's outbound ack mailbox.
const OUTBOUND_BUFFER: usize = 256;

/// Router serving `GET /ws`.
pub fn signaling_router(coordinator: Coordinator) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(coordinator)
}

async fn ws_handler(ws: WebSocketUpgrade, State(coordinator): State<Coordinator>) -> Response {
    if !coordinator.is_accepting() {
        return (StatusCode::SERVICE_UNAVAILABLE, "not accepting connections").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, coordinator))
}

/// Outbound side of one connection, cloned into every request task.
#[derive(Clone)]
struct Outbound {
    tx: mpsc::Sender<Message>,
}

impl Outbound {
    async fn send_ack(&self, ack: Ack) {
        let text = match ack.to_text() {
            Ok(text) => text,
            Err(e) => {
                warn!(target: "sc.signaling", error = %e, "Dropping unencodable ack");
                return;
            }
        };
        if self.tx.send(Message::Text(text)).await.is_err() {
            debug!(
                target: "sc.signaling",
                "Dropping ack, connection writer is gone"
            );
        }
    }
}

async fn handle_socket(socket: WebSocket, coordinator: Coordinator) {
    let dispatcher = match coordinator.open_session().await {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            warn!(target: "sc.signaling", error = %e, "Refusing signaling connection");
            return;
        }
    };
    let session_id = dispatcher.session_id();

    let metrics = Arc::clone(coordinator.metrics());
    metrics.connection_opened();
    sc_metrics::set_connections_active(metrics.connection_count());
    info!(
        target: "sc.signaling",
        session_id = %session_id,
        "Signaling connection opened"
    );

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);
    let mailbox = MailboxMonitor::new(ActorType::Connection, session_id.to_string());
    let outbound = Outbound { tx };

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            mailbox.observe(rx.len());
            if sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let token = coordinator.connection_token();
    loop {
        tokio::select! {
            () = token.cancelled() => {
                debug!(
                    target: "sc.signaling",
                    session_id = %session_id,
                    "Connection cancelled by coordinator shutdown"
                );
                break;
            }

            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_text(&text, &dispatcher, &outbound, &metrics).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(
                        target: "sc.signaling",
                        session_id = %session_id,
                        error = %e,
                        "WebSocket read failed"
                    );
                    break;
                }
            },
        }
    }

    match dispatcher.disconnect().await {
        Ok(Some(report)) => debug!(
            target: "sc.signaling",
            session_id = %session_id,
            transports_closed = report.transports_closed,
            producers_closed = report.producers_closed,
            "Session released"
        ),
        Ok(None) => {}
        Err(e) => warn!(
            target: "sc.signaling",
            session_id = %session_id,
            error = %e,
            "Session teardown failed"
        ),
    }

    drop(outbound);
    writer.abort();
    let _ = writer.await;

    metrics.connection_closed();
    sc_metrics::set_connections_active(metrics.connection_count());
    info!(
        target: "sc.signaling",
        session_id = %session_id,
        "Signaling connection closed"
    );
}

async fn handle_text(
    text: &str,
    dispatcher: &SignalingDispatcher,
    outbound: &Outbound,
    metrics: &Arc<ActorMetrics>,
) {
    let frame = InboundFrame::parse(text);
    let event = frame.event;

    let request = match (frame.id, frame.request) {
        (Some(id), Ok(request)) => (id, request),
        (Some(id), Err(e)) => {
            sc_metrics::record_error(event, e.kind(), e.error_code());
            outbound.send_ack(Ack::from_result(id, &Err(e))).await;
            return;
        }
        (None, result) => {
            debug!(
                target: "sc.signaling",
                session_id = %dispatcher.session_id(),
                event,
                valid = result.is_ok(),
                "Ignoring frame without id"
            );
            return;
        }
    };

    let (id, request) = request;
    let task_dispatcher = dispatcher.clone();
    let task = tokio::spawn(async move {
        let started = Instant::now();
        let result = task_dispatcher.dispatch(request).await;
        sc_metrics::record_signaling_request(event, result.is_ok(), started.elapsed());
        if let Err(e) = &result {
            log_request_error(&task_dispatcher, event, e);
        }
        result
    });

    let outbound = outbound.clone();
    let metrics = Arc::clone(metrics);
    tokio::spawn(async move {
        let result = match task.await {
            Ok(result) => result,
            Err(e) => {
                if e.is_panic() {
                    metrics.record_panic(ActorType::Connection);
                }
                Err(ScError::Internal(format!("request task failed: {e}")))
            }
        };
        outbound.send_ack(Ack::from_result(id, &result)).await;
    });
}

fn log_request_error(dispatcher: &SignalingDispatcher, event: &'static str, error: &ScError) {
    sc_metrics::record_error(event, error.kind(), error.error_code());
    if error.is_fatal() {
        warn!(
            target: "sc.signaling",
            session_id = %dispatcher.session_id(),
            event,
            error = %error,
            "Request failed, media engine unavailable"
        );
    } else {
        debug!(
            target: "sc.signaling",
            session_id = %dispatcher.session_id(),
            event,
            error = %error,
            "Request failed"
        );
    }
}
