//! Signaling Coordinator
//!
//! WebSocket signaling server brokering WebRTC resources on a
//! selective-forwarding media engine.
//!
//! # Servers
//!
//! - WebSocket server for client signaling (default: 0.0.0.0:3000, path `/ws`)
//! - HTTP server for health endpoints and `/metrics` (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Build router capabilities and start the media engine
//! 4. Start the coordinator (registry actor, engine event pump)
//! 5. Start health HTTP server
//! 6. Start WebSocket signaling server
//! 7. Wait for SIGTERM/Ctrl+C or engine death
//!
//! # Exit
//!
//! A graceful shutdown exits 0. Engine death marks the health checks failed,
//! waits `SC_ENGINE_DEATH_GRACE_MS` and exits non-zero.

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use signaling_coordinator::capabilities::{default_media_codecs, RtpCapabilities};
use signaling_coordinator::config::Config;
use signaling_coordinator::coordinator::Coordinator;
use signaling_coordinator::engine::LocalEngine;
use signaling_coordinator::observability::{health_router, init_metrics_recorder, HealthState};
use signaling_coordinator::signaling::signaling_router;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often shutdown checks whether connections have drained.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signaling_coordinator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Signaling Coordinator");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        coordinator_id = %config.coordinator_id,
        ws_bind_address = %config.ws_bind_address,
        health_bind_address = %config.health_bind_address,
        listen_ip = %config.listen_ip,
        announced_ip = ?config.announced_ip,
        rtc_min_port = config.rtc_min_port,
        rtc_max_port = config.rtc_max_port,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());

    // Media engine
    let capabilities = RtpCapabilities::from_catalog(default_media_codecs());
    info!(
        codecs = capabilities.codecs.len(),
        "Router RTP capabilities built"
    );
    let engine = Arc::new(LocalEngine::new(capabilities).map_err(|e| {
        error!(error = %e, "Failed to start media engine");
        e
    })?);
    info!("Media engine started");

    let coordinator = Coordinator::new(
        config.coordinator_id.clone(),
        engine,
        config.listen_config(),
        Arc::clone(&health_state),
    );
    info!("Coordinator initialized");

    // Start health HTTP server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    // Bind listeners BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let ws_addr: SocketAddr = config.ws_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.ws_bind_address, "Invalid WebSocket bind address");
        format!("Invalid WebSocket bind address: {e}")
    })?;
    let ws_listener = tokio::net::TcpListener::bind(ws_addr).await.map_err(|e| {
        error!(error = %e, addr = %ws_addr, "Failed to bind WebSocket server");
        format!("Failed to bind WebSocket server to {ws_addr}: {e}")
    })?;

    // The health server outlives the signaling server so health checks report the
    // shutdown; it stops when the registry closes.
    let health_coordinator = coordinator.clone();
    let health_task = tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_coordinator.closed().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    let ws_app = signaling_router(coordinator.clone()).layer(TraceLayer::new_for_http());
    let ws_coordinator = coordinator.clone();
    let ws_task = tokio::spawn(async move {
        info!(addr = %ws_addr, "WebSocket server starting");
        let server = axum::serve(ws_listener, ws_app).with_graceful_shutdown(async move {
            ws_coordinator.shutdown_started().await;
            info!("WebSocket server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "WebSocket server failed");
        }
    });

    health_state.set_ready();
    info!("Signaling Coordinator running - press Ctrl+C to shutdown");

    tokio::select! {
        () = shutdown_signal() => {
            info!("Shutdown signal received, initiating graceful shutdown...");
        }
        () = coordinator.shutdown_started() => {}
    }

    // Mark as not ready immediately so k8s stops sending traffic
    coordinator.shutdown();

    // Connections watch the coordinator token and tear their sessions down.
    // Upgraded sockets are not tracked by the HTTP server, so also wait for
    // the connection count to reach zero.
    let drain = async {
        let _ = ws_task.await;
        while coordinator.metrics().connection_count() > 0 {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    };
    if tokio::time::timeout(config.shutdown_timeout(), drain)
        .await
        .is_err()
    {
        warn!(
            timeout_secs = config.shutdown_timeout().as_secs(),
            connections = coordinator.metrics().connection_count(),
            "Connections did not drain in time"
        );
    }

    match coordinator.status().await {
        Ok(status) if status.sessions > 0 => warn!(
            sessions = status.sessions,
            transports = status.transports,
            producers = status.producers,
            "Sessions still registered at shutdown"
        ),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Failed to read registry status at shutdown"),
    }

    if let Some(reason) = coordinator.fatal_reason() {
        // Keep the failed health checks visible before exiting.
        tokio::time::sleep(config.engine_death_grace()).await;
        coordinator.close();
        let _ = health_task.await;
        error!(reason = %reason, "Signaling Coordinator exiting after media engine death");
        return Err(format!("media engine died: {reason}").into());
    }

    coordinator.close();
    let _ = health_task.await;

    info!("Signaling Coordinator shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
