//! # SC Test Utilities
//!
//! Shared test utilities for the signaling coordinator.
//!
//! This crate provides a scriptable media engine and test fixtures for
//! exercising the coordinator without a real SFU worker.
//!
//! ## Modules
//!
//! - `mock_engine` - `MediaEngine` mock with failure injection, gated
//!   transport creation and event emission
//! - `fixtures` - Client DTLS/RTP parameters and signaling frames
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let engine = MockEngine::builder()
//!         .fail_produce(EngineError::UnsupportedMedia("h265".into()))
//!         .build();
//!
//!     let coordinator = Coordinator::new("sc-test", engine.clone(), listen(), health());
//!     // Run your test...
//! }
//! ```
//!
//! ### Racing a disconnect against transport creation
//!
//! ```rust,ignore
//! let engine = MockEngine::builder().gate_create().build();
//! // issue createWebRtcTransport ...
//! engine.wait_for_create().await;
//! dispatcher.disconnect().await?;
//! engine.release_create();
//! // the transport the engine produced is closed as an orphan
//! assert_eq!(engine.closed_transports().len(), 1);
//! ```

pub mod fixtures;
pub mod mock_engine;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_engine::*;
