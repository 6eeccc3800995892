//! Client-facing signaling.
//!
//! # Modules
//!
//! - [`protocol`] - Frame envelope, request decoding, typed responses and acks
//! - [`dispatcher`] - Per-session request handling against engine and registry
//! - [`connection`] - axum WebSocket endpoint

pub mod connection;
pub mod dispatcher;
pub mod protocol;

pub use connection::signaling_router;
pub use dispatcher::SignalingDispatcher;
pub use protocol::{Ack, InboundFrame, SignalingRequest, SignalingResponse, TransportParams};
