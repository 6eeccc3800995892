//! Observability for the signaling coordinator.
//!
//! Instrumentation uses `#[instrument(skip_all)]` with explicit id fields;
//! RTP/DTLS payloads are never logged.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `sc_sessions_active` | Gauge | none | Registered sessions |
//! | `sc_transports_active` | Gauge | none | Live transports |
//! | `sc_producers_active` | Gauge | none | Live producers |
//! | `sc_connections_active` | Gauge | none | Open signaling connections |
//! | `sc_signaling_request_duration_seconds` | Histogram | `event`, `status` | Request latency |
//! | `sc_errors_total` | Counter | `event`, `error_type`, `code` | Failed requests |
//! | `sc_teardown_resources_released_total` | Counter | `resource` | Resources closed by teardown |
//! | `sc_orphans_closed_total` | Counter | `resource` | Resources closed after their owner vanished |
//! | `sc_engine_close_failures_total` | Counter | `resource` | Engine close errors (logged, skipped) |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
