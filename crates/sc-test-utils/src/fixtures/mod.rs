//! Pre-configured test data fixtures for coordinator testing.
//!
//! Provides:
//! - Client DTLS parameters
//! - Opus and VP8 RTP parameters
//! - Signaling request frames in the wire envelope

use serde_json::{json, Map, Value};
use signaling_coordinator::engine::params::{
    DtlsFingerprint, DtlsParameters, DtlsRole, RtpCodecParameters, RtpParameters,
};
use signaling_coordinator::engine::TransportListenConfig;
use uuid::Uuid;

/// Listen parameters for tests (loopback, small port range).
#[must_use]
pub fn test_listen_config() -> TransportListenConfig {
    TransportListenConfig {
        listen_ip: "127.0.0.1".to_string(),
        announced_ip: None,
        rtc_min_port: 40000,
        rtc_max_port: 40099,
        ..TransportListenConfig::default()
    }
}

/// DTLS parameters as a browser client would send them.
#[must_use]
pub fn client_dtls() -> DtlsParameters {
    DtlsParameters {
        role: DtlsRole::Client,
        fingerprints: vec![DtlsFingerprint {
            algorithm: "sha-256".to_string(),
            value: "AA:BB:CC:DD:EE:FF:00:11:22:33:44:55:66:77:88:99:AA:BB:CC:DD:EE:FF:00:11:22:33:44:55:66:77:88:99"
                .to_string(),
        }],
    }
}

/// Opus audio RTP parameters.
#[must_use]
pub fn opus_rtp() -> RtpParameters {
    let mut parameters = Map::new();
    parameters.insert("useinbandfec".to_string(), Value::from(1));
    rtp_parameters("0", "audio/opus", 111, 48000, Some(2), parameters)
}

/// VP8 video RTP parameters.
#[must_use]
pub fn vp8_rtp() -> RtpParameters {
    rtp_parameters("1", "video/VP8", 96, 90000, None, Map::new())
}

fn rtp_parameters(
    mid: &str,
    mime_type: &str,
    payload_type: u8,
    clock_rate: u32,
    channels: Option<u8>,
    parameters: Map<String, Value>,
) -> RtpParameters {
    RtpParameters {
        mid: Some(mid.to_string()),
        codecs: vec![RtpCodecParameters {
            mime_type: mime_type.to_string(),
            payload_type,
            clock_rate,
            channels,
            parameters,
            rtcp_feedback: Vec::new(),
        }],
        header_extensions: Vec::new(),
        encodings: Vec::new(),
        rtcp: None,
    }
}

/// A well-formed transport id no coordinator has issued.
#[must_use]
pub fn unknown_transport_id() -> String {
    Uuid::new_v4().to_string()
}

/// Builds signaling request frames (`{"id", "event", "data"}`).
#[derive(Debug, Default)]
pub struct FrameBuilder {
    next_id: u64,
}

impl FrameBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next frame will carry.
    #[must_use]
    pub fn peek_id(&self) -> u64 {
        self.next_id + 1
    }

    /// Build a frame and return it with its request id.
    pub fn frame(&mut self, event: &str, data: Value) -> (u64, String) {
        self.next_id += 1;
        let id = self.next_id;
        (
            id,
            json!({ "id": id, "event": event, "data": data }).to_string(),
        )
    }

    pub fn get_router_rtp_capabilities(&mut self) -> (u64, String) {
        self.frame("getRouterRtpCapabilities", json!({}))
    }

    pub fn create_webrtc_transport(&mut self) -> (u64, String) {
        self.frame("createWebRtcTransport", json!({}))
    }

    pub fn connect_transport(&mut self, transport_id: &str) -> (u64, String) {
        self.frame(
            "connectTransport",
            json!({ "transportId": transport_id, "dtlsParameters": client_dtls() }),
        )
    }

    pub fn produce(&mut self, transport_id: &str, kind: &str, rtp: &RtpParameters) -> (u64, String) {
        self.frame(
            "produce",
            json!({ "transportId": transport_id, "kind": kind, "rtpParameters": rtp }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_builder_increments_ids() {
        let mut frames = FrameBuilder::new();
        assert_eq!(frames.peek_id(), 1);

        let (first, _) = frames.get_router_rtp_capabilities();
        let (second, text) = frames.connect_transport("abc");
        assert_eq!((first, second), (1, 2));

        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["event"], "connectTransport");
        assert_eq!(value["data"]["transportId"], "abc");
        assert_eq!(value["data"]["dtlsParameters"]["role"], "client");
    }

    #[test]
    fn test_rtp_fixtures_carry_one_codec() {
        assert_eq!(opus_rtp().codecs.len(), 1);
        assert_eq!(vp8_rtp().codecs[0].clock_rate, 90000);
    }
}
