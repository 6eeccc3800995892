//! Router RTP capabilities and the static codec catalog.
//!
//! The catalog is process-wide configuration handed to the media engine. The
//! resulting [`RtpCapabilities`] are built once at startup and shared
//! read-only (behind an `Arc`) by every session.
//!
//! Dynamic payload types are assigned from 100 upwards in catalog order.

use crate::types::MediaKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// First dynamic RTP payload type handed out to catalog codecs.
const FIRST_DYNAMIC_PAYLOAD_TYPE: u8 = 100;

/// RTCP feedback mechanism supported by a codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcpFeedback {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parameter: String,
}

impl RtcpFeedback {
    fn new(kind: &str, parameter: &str) -> Self {
        Self {
            kind: kind.to_string(),
            parameter: parameter.to_string(),
        }
    }
}

/// One codec the router can negotiate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_payload_type: Option<u8>,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

/// RTP header extension offered by the router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpHeaderExtension {
    pub kind: MediaKind,
    pub uri: String,
    pub preferred_id: u16,
    pub preferred_encrypt: bool,
    pub direction: String,
}

/// The negotiable codec set of the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilities {
    pub codecs: Vec<RtpCodecCapability>,
    #[serde(default)]
    pub header_extensions: Vec<RtpHeaderExtension>,
}

impl RtpCapabilities {
    /// Build router capabilities from a codec catalog.
    ///
    /// Assigns payload types to codecs without one and fills in the default
    /// RTCP feedback for each media kind when the catalog entry has none.
    #[must_use]
    pub fn from_catalog(catalog: Vec<RtpCodecCapability>) -> Self {
        let mut next_payload_type = FIRST_DYNAMIC_PAYLOAD_TYPE;

        let codecs = catalog
            .into_iter()
            .map(|mut codec| {
                if codec.preferred_payload_type.is_none() {
                    codec.preferred_payload_type = Some(next_payload_type);
                    next_payload_type = next_payload_type.saturating_add(1);
                }
                if codec.rtcp_feedback.is_empty() {
                    codec.rtcp_feedback = default_rtcp_feedback(codec.kind);
                }
                codec
            })
            .collect();

        Self {
            codecs,
            header_extensions: default_header_extensions(),
        }
    }

    /// Look up the catalog entry matching a codec's kind, MIME type and clock rate.
    ///
    /// MIME types compare case-insensitively.
    #[must_use]
    pub fn find_codec(
        &self,
        kind: MediaKind,
        mime_type: &str,
        clock_rate: u32,
    ) -> Option<&RtpCodecCapability> {
        self.codecs.iter().find(|codec| {
            codec.kind == kind
                && codec.clock_rate == clock_rate
                && codec.mime_type.eq_ignore_ascii_case(mime_type)
        })
    }

    /// Number of codecs offered for a media kind.
    #[must_use]
    pub fn codec_count(&self, kind: MediaKind) -> usize {
        self.codecs.iter().filter(|codec| codec.kind == kind).count()
    }
}

/// The built-in codec catalog: Opus audio, VP8 and H264 video.
#[must_use]
pub fn default_media_codecs() -> Vec<RtpCodecCapability> {
    let mut h264_parameters = Map::new();
    h264_parameters.insert("packetization-mode".to_string(), Value::from(1));
    h264_parameters.insert("profile-level-id".to_string(), Value::from("42e01f"));
    h264_parameters.insert("level-asymmetry-allowed".to_string(), Value::from(1));

    vec![
        RtpCodecCapability {
            kind: MediaKind::Audio,
            mime_type: "audio/opus".to_string(),
            preferred_payload_type: None,
            clock_rate: 48000,
            channels: Some(2),
            parameters: Map::new(),
            rtcp_feedback: Vec::new(),
        },
        RtpCodecCapability {
            kind: MediaKind::Video,
            mime_type: "video/VP8".to_string(),
            preferred_payload_type: None,
            clock_rate: 90000,
            channels: None,
            parameters: Map::new(),
            rtcp_feedback: Vec::new(),
        },
        RtpCodecCapability {
            kind: MediaKind::Video,
            mime_type: "video/H264".to_string(),
            preferred_payload_type: None,
            clock_rate: 90000,
            channels: None,
            parameters: h264_parameters,
            rtcp_feedback: Vec::new(),
        },
    ]
}

fn default_rtcp_feedback(kind: MediaKind) -> Vec<RtcpFeedback> {
    match kind {
        MediaKind::Audio => vec![RtcpFeedback::new("transport-cc", "")],
        MediaKind::Video => vec![
            RtcpFeedback::new("nack", ""),
            RtcpFeedback::new("nack", "pli"),
            RtcpFeedback::new("ccm", "fir"),
            RtcpFeedback::new("goog-remb", ""),
            RtcpFeedback::new("transport-cc", ""),
        ],
    }
}

fn default_header_extensions() -> Vec<RtpHeaderExtension> {
    let ext = |kind: MediaKind, uri: &str, preferred_id: u16| RtpHeaderExtension {
        kind,
        uri: uri.to_string(),
        preferred_id,
        preferred_encrypt: false,
        direction: "sendrecv".to_string(),
    };

    vec![
        ext(MediaKind::Audio, "urn:ietf:params:rtp-hdrext:sdes:mid", 1),
        ext(MediaKind::Video, "urn:ietf:params:rtp-hdrext:sdes:mid", 1),
        ext(
            MediaKind::Audio,
            "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time",
            4,
        ),
        ext(
            MediaKind::Video,
            "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time",
            4,
        ),
        ext(
            MediaKind::Video,
            "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01",
            5,
        ),
        ext(
            MediaKind::Audio,
            "urn:ietf:params:rtp-hdrext:ssrc-audio-level",
            10,
        ),
    ]
}
