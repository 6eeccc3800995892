//! Identifier newtypes and resource state enums shared across the coordinator.
//!
//! All resource identifiers are UUID v4 values. Identifiers are never reused:
//! a freed id cannot resolve to a resource created later.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of one client session (one signaling connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

/// Identifier of a WebRTC transport, assigned by the media engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportId(Uuid);

/// Identifier of a producer, assigned by the media engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProducerId(Uuid);

impl SessionId {
    /// Generate a fresh session id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportId {
    /// Generate a fresh transport id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a client-supplied transport id.
    ///
    /// Returns `None` for malformed input so callers can report it the same
    /// way as an unknown id.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }
}

impl Default for TransportId {
    fn default() -> Self {
        Self::new()
    }
}

impl ProducerId {
    /// Generate a fresh producer id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a producer id from its string form.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }
}

impl Default for ProducerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Media kind carried by a producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Returns the media kind as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// Connection state of a transport as tracked by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    /// Created, `connectTransport` not yet issued.
    New,
    /// `connectTransport` issued, engine has not confirmed.
    Connecting,
    /// Engine accepted the client's DTLS parameters.
    Connected,
    /// Closed (terminal).
    Closed,
}

impl TransportState {
    /// Returns the state as a string for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransportState::New => "new",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Closed => "closed",
        }
    }

    /// Position in the connection lifecycle; states only ever move forward,
    /// except a failed connect which falls back to `New`.
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            TransportState::New => 0,
            TransportState::Connecting => 1,
            TransportState::Connected => 2,
            TransportState::Closed => 3,
        }
    }
}

/// State of a producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerState {
    Active,
    Closed,
}

/// Per-connection protocol phase, derived from the session's transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No transports.
    Idle,
    /// At least one transport exists, none connected.
    Negotiating,
    /// At least one connected transport.
    Ready,
    /// Session disconnected (terminal).
    Closed,
}

impl SessionPhase {
    /// Returns the phase as a string for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Negotiating => "negotiating",
            SessionPhase::Ready => "ready",
            SessionPhase::Closed => "closed",
        }
    }
}
