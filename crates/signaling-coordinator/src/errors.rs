//! Signaling coordinator error types.
//!
//! Errors map to numeric codes and client-safe messages for signaling
//! acknowledgements. Internal details are logged server-side but not exposed
//! to clients.

use crate::engine::EngineError;
use thiserror::Error;

/// Signaling coordinator error type.
///
/// Error codes:
/// - `InvalidRequest`: `BAD_REQUEST` (1)
/// - `TransportNotFound`, `ProducerNotFound`, `SessionNotFound`: `NOT_FOUND` (4)
/// - `Conflict`, `InvalidState`: `CONFLICT` (5)
/// - `UnknownSession`: `SESSION_GONE` (8)
/// - `EngineFailure`: `ENGINE_REJECTED` (9)
/// - `EngineUnavailable`: `ENGINE_UNAVAILABLE` (10)
/// - `Config`, `Internal`: `INTERNAL_ERROR` (6)
#[derive(Debug, Error)]
pub enum ScError {
    /// Transport id unknown, or owned by another session.
    #[error("Transport not found: {0}")]
    TransportNotFound(String),

    /// Producer id unknown.
    #[error("Producer not found: {0}")]
    ProducerNotFound(String),

    /// Session id unknown.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The owning session disconnected while the operation was in flight.
    #[error("Session disconnected: {0}")]
    UnknownSession(String),

    /// The media engine rejected a connect/produce request.
    #[error("Engine failure: {0}")]
    EngineFailure(EngineError),

    /// The media engine worker terminated. Fatal to the process.
    #[error("Media engine unavailable: {0}")]
    EngineUnavailable(String),

    /// Malformed signaling request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Resource is not in a state that allows the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Duplicate id.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error with context.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScError {
    /// Returns the signaling error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            ScError::InvalidRequest(_) => 1,
            ScError::TransportNotFound(_)
            | ScError::ProducerNotFound(_)
            | ScError::SessionNotFound(_) => 4,
            ScError::Conflict(_) | ScError::InvalidState(_) => 5,
            ScError::Config(_) | ScError::Internal(_) => 6,
            ScError::UnknownSession(_) => 8,
            ScError::EngineFailure(_) => 9,
            ScError::EngineUnavailable(_) => 10,
        }
    }

    /// Short label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ScError::TransportNotFound(_)
            | ScError::ProducerNotFound(_)
            | ScError::SessionNotFound(_) => "not_found",
            ScError::UnknownSession(_) => "unknown_session",
            ScError::EngineFailure(_) => "engine_failure",
            ScError::EngineUnavailable(_) => "engine_unavailable",
            ScError::InvalidRequest(_) => "invalid_request",
            ScError::InvalidState(_) => "invalid_state",
            ScError::Conflict(_) => "conflict",
            ScError::Config(_) | ScError::Internal(_) => "internal",
        }
    }

    /// Whether the error leaves the process unable to continue.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScError::EngineUnavailable(_))
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            ScError::TransportNotFound(id) => format!("transport with id \"{id}\" not found"),
            ScError::ProducerNotFound(id) => format!("producer with id \"{id}\" not found"),
            ScError::SessionNotFound(_) | ScError::UnknownSession(_) => {
                "session is no longer connected".to_string()
            }
            ScError::EngineFailure(e) => e.to_string(),
            ScError::EngineUnavailable(_) => {
                "Media server is unavailable, please reconnect".to_string()
            }
            ScError::InvalidRequest(msg) | ScError::InvalidState(msg) | ScError::Conflict(msg) => {
                msg.clone()
            }
            ScError::Config(_) | ScError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

impl From<EngineError> for ScError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Unavailable(reason) => ScError::EngineUnavailable(reason),
            other => ScError::EngineFailure(other),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(ScError::InvalidRequest("bad".to_string()).error_code(), 1);
        assert_eq!(ScError::TransportNotFound("t1".to_string()).error_code(), 4);
        assert_eq!(ScError::ProducerNotFound("p1".to_string()).error_code(), 4);
        assert_eq!(ScError::SessionNotFound("s1".to_string()).error_code(), 4);
        assert_eq!(ScError::Conflict("dup".to_string()).error_code(), 5);
        assert_eq!(ScError::InvalidState("closed".to_string()).error_code(), 5);
        assert_eq!(ScError::Internal("oops".to_string()).error_code(), 6);
        assert_eq!(ScError::UnknownSession("s1".to_string()).error_code(), 8);
        assert_eq!(
            ScError::EngineFailure(EngineError::UnsupportedMedia("x".to_string())).error_code(),
            9
        );
        assert_eq!(
            ScError::EngineUnavailable("worker died".to_string()).error_code(),
            10
        );
    }

    #[test]
    fn test_engine_error_conversion() {
        let err: ScError = EngineError::Unavailable("pid 42 exited".to_string()).into();
        assert!(matches!(err, ScError::EngineUnavailable(_)));
        assert!(err.is_fatal());

        let err: ScError = EngineError::InvalidDtlsParameters("no fingerprints".to_string()).into();
        assert!(matches!(
            err,
            ScError::EngineFailure(EngineError::InvalidDtlsParameters(_))
        ));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let internal = ScError::Internal("channel send failed: receiver dropped".to_string());
        assert_eq!(internal.client_message(), "An internal error occurred");

        let unavailable = ScError::EngineUnavailable("worker pid 4242 SIGKILL".to_string());
        assert!(!unavailable.client_message().contains("4242"));
    }

    #[test]
    fn test_not_found_message_names_the_id() {
        let err = ScError::TransportNotFound("abc".to_string());
        assert_eq!(err.client_message(), "transport with id \"abc\" not found");
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", ScError::UnknownSession("s-1".to_string())),
            "Session disconnected: s-1"
        );
        assert_eq!(
            format!(
                "{}",
                ScError::EngineFailure(EngineError::Rejected("connect() already called".to_string()))
            ),
            "Engine failure: Engine rejected request: connect() already called"
        );
    }
}
