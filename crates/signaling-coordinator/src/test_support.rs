//! Shared fixtures for unit tests inside this crate.
//!
//! Integration tests use `sc-test-utils` instead.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::actors::{ActorMetrics, RegistryHandle};
use crate::capabilities::{default_media_codecs, RtpCapabilities};
use crate::engine::params::{
    DtlsFingerprint, DtlsParameters, DtlsRole, RtpCodecParameters, RtpParameters,
};
use crate::engine::LocalEngine;

use serde_json::Map;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub(crate) fn local_engine() -> Arc<LocalEngine> {
    Arc::new(LocalEngine::new(RtpCapabilities::from_catalog(default_media_codecs())).unwrap())
}

pub(crate) fn registry() -> RegistryHandle {
    RegistryHandle::new(
        "sc-unit".to_string(),
        ActorMetrics::new(),
        CancellationToken::new(),
    )
}

pub(crate) fn client_dtls() -> DtlsParameters {
    DtlsParameters {
        role: DtlsRole::Client,
        fingerprints: vec![DtlsFingerprint {
            algorithm: "sha-256".to_string(),
            value: "AA:BB:CC:DD".to_string(),
        }],
    }
}

pub(crate) fn opus_rtp() -> RtpParameters {
    RtpParameters {
        mid: Some("0".to_string()),
        codecs: vec![RtpCodecParameters {
            mime_type: "audio/opus".to_string(),
            payload_type: 111,
            clock_rate: 48000,
            channels: Some(2),
            parameters: Map::new(),
            rtcp_feedback: Vec::new(),
        }],
        header_extensions: Vec::new(),
        encodings: Vec::new(),
        rtcp: None,
    }
}
