//! Signaling wire format.
//!
//! Inbound text frame: `{ "id": <u64>, "event": <name>, "data": <payload> }`.
//! Acknowledgement:    `{ "id": <u64>, "data": <response or { "error" }> }`.
//!
//! Frames are parsed in two steps: the envelope first, then the payload for
//! the named event. A frame whose envelope carries an `id` always gets an
//! ack, even when the rest of it is malformed.

use crate::capabilities::RtpCapabilities;
use crate::engine::params::{DtlsParameters, IceCandidate, IceParameters, RtpParameters};
use crate::errors::ScError;
use crate::registry::Transport;
use crate::types::{MediaKind, ProducerId, TransportId};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const EVENT_GET_ROUTER_RTP_CAPABILITIES: &str = "getRouterRtpCapabilities";
pub const EVENT_CREATE_WEBRTC_TRANSPORT: &str = "createWebRtcTransport";
pub const EVENT_CONNECT_TRANSPORT: &str = "connectTransport";
pub const EVENT_PRODUCE: &str = "produce";

/// Metric/log label for frames whose event could not be determined.
pub const EVENT_UNKNOWN: &str = "unknown";

/// A decoded signaling request.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingRequest {
    GetRouterRtpCapabilities,
    CreateWebRtcTransport,
    ConnectTransport {
        /// Raw id from the client; resolved against the caller's session.
        transport_id: String,
        dtls_parameters: DtlsParameters,
    },
    Produce {
        transport_id: String,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectTransportData {
    transport_id: String,
    dtls_parameters: DtlsParameters,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProduceData {
    transport_id: String,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
}

impl SignalingRequest {
    /// Decode the payload of a named event.
    ///
    /// # Errors
    ///
    /// Returns `ScError::InvalidRequest` for an unknown event or a payload
    /// that does not match the event.
    pub fn parse(event: &str, data: Value) -> Result<Self, ScError> {
        match event {
            EVENT_GET_ROUTER_RTP_CAPABILITIES => Ok(Self::GetRouterRtpCapabilities),
            EVENT_CREATE_WEBRTC_TRANSPORT => Ok(Self::CreateWebRtcTransport),
            EVENT_CONNECT_TRANSPORT => {
                let data: ConnectTransportData = decode(event, data)?;
                Ok(Self::ConnectTransport {
                    transport_id: data.transport_id,
                    dtls_parameters: data.dtls_parameters,
                })
            }
            EVENT_PRODUCE => {
                let data: ProduceData = decode(event, data)?;
                Ok(Self::Produce {
                    transport_id: data.transport_id,
                    kind: data.kind,
                    rtp_parameters: data.rtp_parameters,
                })
            }
            other => Err(ScError::InvalidRequest(format!("unknown event \"{other}\""))),
        }
    }

    /// Wire name of the event.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::GetRouterRtpCapabilities => EVENT_GET_ROUTER_RTP_CAPABILITIES,
            Self::CreateWebRtcTransport => EVENT_CREATE_WEBRTC_TRANSPORT,
            Self::ConnectTransport { .. } => EVENT_CONNECT_TRANSPORT,
            Self::Produce { .. } => EVENT_PRODUCE,
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(event: &str, data: Value) -> Result<T, ScError> {
    serde_json::from_value(data)
        .map_err(|e| ScError::InvalidRequest(format!("invalid {event} payload: {e}")))
}

/// Envelope fields, all optional so a broken frame can still be acked by id.
#[derive(Deserialize)]
struct Envelope {
    id: Option<u64>,
    event: Option<String>,
    #[serde(default)]
    data: Value,
}

/// Result of parsing one inbound text frame.
#[derive(Debug)]
pub struct InboundFrame {
    /// Request id to echo in the ack. `None` means the frame cannot be acked.
    pub id: Option<u64>,
    /// Bounded label for logs and metrics.
    pub event: &'static str,
    pub request: Result<SignalingRequest, ScError>,
}

impl InboundFrame {
    /// Parse a text frame. Never fails; problems land in `request`.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                return Self {
                    id: serde_json::from_str::<Value>(text)
                        .ok()
                        .and_then(|v| v.get("id").and_then(Value::as_u64)),
                    event: EVENT_UNKNOWN,
                    request: Err(ScError::InvalidRequest(format!("malformed frame: {e}"))),
                };
            }
        };

        let Some(event) = envelope.event else {
            return Self {
                id: envelope.id,
                event: EVENT_UNKNOWN,
                request: Err(ScError::InvalidRequest("missing event".to_string())),
            };
        };

        let data = if envelope.data.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            envelope.data
        };

        let request = SignalingRequest::parse(&event, data);
        let label = match &request {
            Ok(request) => request.event_name(),
            Err(_) => known_event_label(&event),
        };
        Self {
            id: envelope.id,
            event: label,
            request,
        }
    }
}

fn known_event_label(event: &str) -> &'static str {
    match event {
        EVENT_GET_ROUTER_RTP_CAPABILITIES => EVENT_GET_ROUTER_RTP_CAPABILITIES,
        EVENT_CREATE_WEBRTC_TRANSPORT => EVENT_CREATE_WEBRTC_TRANSPORT,
        EVENT_CONNECT_TRANSPORT => EVENT_CONNECT_TRANSPORT,
        EVENT_PRODUCE => EVENT_PRODUCE,
        _ => EVENT_UNKNOWN,
    }
}

/// Transport parameters returned to the client after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParams {
    pub id: TransportId,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
}

impl From<&Transport> for TransportParams {
    fn from(transport: &Transport) -> Self {
        Self {
            id: transport.id,
            ice_parameters: transport.ice_parameters.clone(),
            ice_candidates: transport.ice_candidates.clone(),
            dtls_parameters: transport.dtls_parameters.clone(),
        }
    }
}

/// Successful response payloads, one per event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SignalingResponse {
    RouterRtpCapabilities {
        #[serde(rename = "rtpCapabilities")]
        rtp_capabilities: RtpCapabilities,
    },
    TransportCreated {
        params: TransportParams,
    },
    TransportConnected {
        success: bool,
    },
    Produced {
        id: ProducerId,
    },
}

/// Acknowledgement frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ack {
    pub id: u64,
    pub data: Value,
}

impl Ack {
    /// Build the ack for a request outcome. Errors carry only the
    /// client-safe message.
    #[must_use]
    pub fn from_result(id: u64, result: &Result<SignalingResponse, ScError>) -> Self {
        let data = match result {
            Ok(response) => serde_json::to_value(response)
                .unwrap_or_else(|e| json!({ "error": format!("serialization failed: {e}") })),
            Err(err) => json!({ "error": err.client_message() }),
        };
        Self { id, data }
    }

    /// Encode as a text frame.
    ///
    /// # Errors
    ///
    /// Returns `ScError::Internal` if serialization fails.
    pub fn to_text(&self) -> Result<String, ScError> {
        serde_json::to_string(self)
            .map_err(|e| ScError::Internal(format!("ack serialization failed: {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::engine::params::DtlsRole;

    #[test]
    fn test_parse_capabilities_request_without_data() {
        let frame = InboundFrame::parse(r#"{"id":1,"event":"getRouterRtpCapabilities"}"#);
        assert_eq!(frame.id, Some(1));
        assert_eq!(frame.event, EVENT_GET_ROUTER_RTP_CAPABILITIES);
        assert_eq!(
            frame.request.unwrap(),
            SignalingRequest::GetRouterRtpCapabilities
        );
    }

    #[test]
    fn test_parse_connect_transport() {
        let frame = InboundFrame::parse(
            r#"{"id":7,"event":"connectTransport","data":{
                "transportId":"abc",
                "dtlsParameters":{"role":"client","fingerprints":[{"algorithm":"sha-256","value":"AA"}]}
            }}"#,
        );
        match frame.request.unwrap() {
            SignalingRequest::ConnectTransport {
                transport_id,
                dtls_parameters,
            } => {
                assert_eq!(transport_id, "abc");
                assert_eq!(dtls_parameters.role, DtlsRole::Client);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_parse_produce_rejects_bad_kind() {
        let frame = InboundFrame::parse(
            r#"{"id":3,"event":"produce","data":{"transportId":"t","kind":"screen","rtpParameters":{"codecs":[]}}}"#,
        );
        assert_eq!(frame.id, Some(3));
        assert_eq!(frame.event, EVENT_PRODUCE);
        assert!(matches!(frame.request, Err(ScError::InvalidRequest(_))));
    }

    #[test]
    fn test_unknown_event_keeps_id() {
        let frame = InboundFrame::parse(r#"{"id":9,"event":"consume","data":{}}"#);
        assert_eq!(frame.id, Some(9));
        assert_eq!(frame.event, EVENT_UNKNOWN);
        assert!(matches!(frame.request, Err(ScError::InvalidRequest(_))));
    }

    #[test]
    fn test_malformed_frame_without_id() {
        let frame = InboundFrame::parse("not json");
        assert_eq!(frame.id, None);
        assert!(frame.request.is_err());
    }

    #[test]
    fn test_ack_success_shapes() {
        let ack = Ack::from_result(
            4,
            &Ok(SignalingResponse::TransportConnected { success: true }),
        );
        assert_eq!(
            serde_json::to_value(&ack).unwrap(),
            json!({ "id": 4, "data": { "success": true } })
        );

        let producer_id = ProducerId::new();
        let ack = Ack::from_result(5, &Ok(SignalingResponse::Produced { id: producer_id }));
        assert_eq!(ack.data, json!({ "id": producer_id.to_string() }));
    }

    #[test]
    fn test_ack_error_uses_client_message() {
        let ack = Ack::from_result(
            2,
            &Err(ScError::TransportNotFound("t-1".to_string())),
        );
        assert_eq!(
            ack.data,
            json!({ "error": "transport with id \"t-1\" not found" })
        );
        assert_eq!(
            ack.to_text().unwrap(),
            r#"{"id":2,"data":{"error":"transport with id \"t-1\" not found"}}"#
        );
    }
}
