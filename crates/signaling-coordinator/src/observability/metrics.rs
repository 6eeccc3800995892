//! Metrics definitions for the signaling coordinator.
//!
//! All metrics follow Prometheus naming conventions:
//! - `sc_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `event`: the four signaling events plus `unknown`
//! - `error_type`: bounded by `ScError::kind()`
//! - `resource`: `transport` or `producer`
//! - `actor_type`: `registry` or `connection`

use crate::registry::RegistryStatus;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Signaling requests include one engine round trip.
        .set_buckets_for_metric(
            Matcher::Prefix("sc_signaling_request".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500,
            ],
        )
        .map_err(|e| format!("Failed to set signaling latency buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("sc_teardown".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set teardown duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Resource gauges
// ============================================================================

/// Publish registry counts.
///
/// Metrics: `sc_sessions_active`, `sc_transports_active`, `sc_producers_active`
pub fn set_registry_counts(status: &RegistryStatus) {
    // usize to f64 conversion is safe for realistic resource counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    {
        gauge!("sc_sessions_active").set(status.sessions as f64);
        gauge!("sc_transports_active").set(status.transports as f64);
        gauge!("sc_producers_active").set(status.producers as f64);
    }
}

/// Set the number of open signaling connections.
///
/// Metric: `sc_connections_active`
pub fn set_connections_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sc_connections_active").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `sc_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sc_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

// ============================================================================
// Signaling
// ============================================================================

/// Record end-to-end latency of one signaling request.
///
/// Metric: `sc_signaling_request_duration_seconds`
/// Labels: `event`, `status` (success, error)
pub fn record_signaling_request(event: &str, success: bool, duration: Duration) {
    let status = if success { "success" } else { "error" };
    histogram!("sc_signaling_request_duration_seconds",
        "event" => event.to_string(),
        "status" => status
    )
    .record(duration.as_secs_f64());
}

/// Record a signaling error.
///
/// Metric: `sc_errors_total`
/// Labels: `event`, `error_type`, `code`
pub fn record_error(event: &str, error_type: &str, code: i32) {
    counter!("sc_errors_total",
        "event" => event.to_string(),
        "error_type" => error_type.to_string(),
        "code" => code.to_string()
    )
    .increment(1);
}

// ============================================================================
// Teardown and cleanup
// ============================================================================

/// Record the duration of one session teardown and the resources it released.
///
/// Metrics: `sc_teardown_duration_seconds`, `sc_teardown_resources_released_total`
pub fn record_teardown(duration: Duration, transports: usize, producers: usize) {
    histogram!("sc_teardown_duration_seconds").record(duration.as_secs_f64());
    counter!("sc_teardown_resources_released_total", "resource" => "transport")
        .increment(transports as u64);
    counter!("sc_teardown_resources_released_total", "resource" => "producer")
        .increment(producers as u64);
}

/// Record an engine resource closed because its owner vanished mid-creation.
///
/// Metric: `sc_orphans_closed_total`
/// Labels: `resource`
pub fn record_orphan_closed(resource: &'static str) {
    counter!("sc_orphans_closed_total", "resource" => resource).increment(1);
}

/// Record an engine close call that returned an error.
///
/// Metric: `sc_engine_close_failures_total`
/// Labels: `resource`
pub fn record_engine_close_failure(resource: &'static str) {
    counter!("sc_engine_close_failures_total", "resource" => resource).increment(1);
}

/// Record an engine notification folded into the registry.
///
/// Metric: `sc_engine_events_total`
/// Labels: `event`
pub fn record_engine_event(event: &'static str) {
    counter!("sc_engine_events_total", "event" => event).increment(1);
}

/// Record an actor panic.
///
/// Metric: `sc_actor_panics_total`
pub fn record_actor_panic(actor_type: &str) {
    counter!("sc_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    // The metrics crate falls back to a no-op recorder when none is
    // installed, so these only exercise the recording paths.

    #[test]
    fn test_set_registry_counts() {
        set_registry_counts(&RegistryStatus::default());
        set_registry_counts(&RegistryStatus {
            sessions: 3,
            transports: 6,
            producers: 12,
        });
    }

    #[test]
    fn test_record_signaling_request() {
        record_signaling_request("produce", true, Duration::from_millis(4));
        record_signaling_request("connectTransport", false, Duration::from_millis(1));
    }

    #[test]
    fn test_cleanup_counters() {
        record_teardown(Duration::from_millis(12), 2, 3);
        record_orphan_closed("transport");
        record_orphan_closed("producer");
        record_engine_close_failure("transport");
        record_engine_event("transport_closed");
        record_error("produce", "not_found", 4);
        record_actor_panic("registry");
        set_actor_mailbox_depth("registry", 10);
        set_connections_active(5);
    }

    #[test]
    fn test_debugging_recorder_captures_metrics() {
        use metrics_util::debugging::DebuggingRecorder;

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            set_registry_counts(&RegistryStatus {
                sessions: 1,
                transports: 1,
                producers: 1,
            });
            record_orphan_closed("transport");
            record_signaling_request("produce", true, Duration::from_millis(2));
        });

        let names: Vec<String> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();

        assert!(names.iter().any(|n| n == "sc_sessions_active"));
        assert!(names.iter().any(|n| n == "sc_orphans_closed_total"));
        assert!(names
            .iter()
            .any(|n| n == "sc_signaling_request_duration_seconds"));
    }
}
