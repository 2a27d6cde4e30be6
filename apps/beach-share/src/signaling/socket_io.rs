//! Engine.IO v4 / Socket.IO v5 text framing, just enough for a client on the
//! default namespace.

use serde::Deserialize;
use serde_json::{Value, json};

use super::{InboundSignal, OutboundSignal, SignalingError};

/// Engine.IO open handshake payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(OpenHandshake),
    Close,
    Ping(String),
    Pong(String),
    Noop,
    /// Namespace connect; the server's acknowledgement carries our id.
    Connect { sid: Option<String> },
    Disconnect,
    Event { name: String, data: Value },
    ConnectError(String),
}

pub fn encode(packet: &Packet) -> Result<String, SignalingError> {
    Ok(match packet {
        Packet::Open(handshake) => format!(
            "0{}",
            json!({
                "sid": handshake.sid,
                "upgrades": [],
                "pingInterval": handshake.ping_interval,
                "pingTimeout": handshake.ping_timeout,
            })
        ),
        Packet::Close => "1".to_string(),
        Packet::Ping(probe) => format!("2{probe}"),
        Packet::Pong(probe) => format!("3{probe}"),
        Packet::Noop => "6".to_string(),
        Packet::Connect { sid: None } => "40".to_string(),
        Packet::Connect { sid: Some(sid) } => format!("40{}", json!({ "sid": sid })),
        Packet::Disconnect => "41".to_string(),
        Packet::Event { name, data } => {
            format!("42{}", serde_json::to_string(&json!([name, data]))?)
        }
        Packet::ConnectError(message) => format!("44{}", json!({ "message": message })),
    })
}

pub fn decode(frame: &str) -> Result<Packet, SignalingError> {
    let mut chars = frame.chars();
    let engine_type = chars
        .next()
        .ok_or_else(|| SignalingError::Protocol("empty frame".into()))?;
    let rest = chars.as_str();
    match engine_type {
        '0' => {
            let handshake: OpenHandshake = serde_json::from_str(rest)
                .map_err(|err| SignalingError::Protocol(format!("bad open packet: {err}")))?;
            Ok(Packet::Open(handshake))
        }
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping(rest.to_string())),
        '3' => Ok(Packet::Pong(rest.to_string())),
        '4' => decode_socket(rest),
        '6' => Ok(Packet::Noop),
        other => Err(SignalingError::Protocol(format!(
            "unsupported engine.io packet type {other}"
        ))),
    }
}

fn decode_socket(body: &str) -> Result<Packet, SignalingError> {
    let mut chars = body.chars();
    let socket_type = chars
        .next()
        .ok_or_else(|| SignalingError::Protocol("empty socket.io packet".into()))?;
    let payload = skip_namespace(chars.as_str());
    match socket_type {
        '0' => {
            if payload.is_empty() {
                return Ok(Packet::Connect { sid: None });
            }
            let value: Value = serde_json::from_str(payload)
                .map_err(|err| SignalingError::Protocol(format!("bad connect packet: {err}")))?;
            let sid = value.get("sid").and_then(Value::as_str).map(str::to_string);
            Ok(Packet::Connect { sid })
        }
        '1' => Ok(Packet::Disconnect),
        '2' => {
            let payload = payload.trim_start_matches(|c: char| c.is_ascii_digit());
            let mut items: Vec<Value> = serde_json::from_str(payload)
                .map_err(|err| SignalingError::Protocol(format!("bad event packet: {err}")))?;
            if items.is_empty() {
                return Err(SignalingError::Protocol("event packet without name".into()));
            }
            let name = match items.remove(0) {
                Value::String(name) => name,
                other => {
                    return Err(SignalingError::Protocol(format!(
                        "event name must be a string, got {other}"
                    )));
                }
            };
            let data = if items.is_empty() {
                Value::Null
            } else {
                items.remove(0)
            };
            Ok(Packet::Event { name, data })
        }
        '4' => {
            let message = serde_json::from_str::<Value>(payload)
                .ok()
                .and_then(|value| {
                    value
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| payload.to_string());
            Ok(Packet::ConnectError(message))
        }
        other => Err(SignalingError::Protocol(format!(
            "unsupported socket.io packet type {other}"
        ))),
    }
}

// Packets for a non-default namespace look like `/chat,["event"]`.
fn skip_namespace(payload: &str) -> &str {
    if payload.starts_with('/') {
        match payload.find(',') {
            Some(idx) => &payload[idx + 1..],
            None => "",
        }
    } else {
        payload
    }
}

/// Frame an outbound signal as a Socket.IO event.
pub fn encode_signal(signal: &OutboundSignal) -> Result<String, SignalingError> {
    let value = serde_json::to_value(signal)?;
    let name = value
        .get("event")
        .and_then(Value::as_str)
        .unwrap_or(signal.name())
        .to_string();
    let data = value.get("data").cloned().unwrap_or(Value::Null);
    encode(&Packet::Event { name, data })
}

/// Interpret a Socket.IO event. Events this client does not know are `None`.
pub fn decode_signal(name: &str, data: Value) -> Result<Option<InboundSignal>, SignalingError> {
    if !matches!(name, "viewer-joined" | "offer" | "answer" | "ice-candidate") {
        return Ok(None);
    }
    let signal = serde_json::from_value(json!({ "event": name, "data": data }))
        .map_err(|err| SignalingError::Protocol(format!("bad {name} payload: {err}")))?;
    Ok(Some(signal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::{PeerId, Role};
    use crate::transport::{IceCandidate, SdpType, SessionDescription};

    #[test]
    fn decodes_open_handshake() {
        let packet = decode(
            r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#,
        )
        .unwrap();
        assert_eq!(
            packet,
            Packet::Open(OpenHandshake {
                sid: "lv_VI97HAXpY6yYWAAAC".into(),
                ping_interval: 25000,
                ping_timeout: 20000,
            })
        );
    }

    #[test]
    fn connect_ack_carries_participant_id() {
        assert_eq!(
            decode(r#"40{"sid":"wZX3oN0bSVIhsaknAAAI"}"#).unwrap(),
            Packet::Connect {
                sid: Some("wZX3oN0bSVIhsaknAAAI".into())
            }
        );
        assert_eq!(encode(&Packet::Connect { sid: None }).unwrap(), "40");
    }

    #[test]
    fn ping_is_answered_with_matching_pong() {
        assert_eq!(decode("2").unwrap(), Packet::Ping(String::new()));
        assert_eq!(encode(&Packet::Pong(String::new())).unwrap(), "3");
        assert_eq!(encode(&Packet::Pong("probe".into())).unwrap(), "3probe");
    }

    #[test]
    fn decodes_event_with_ack_id_and_namespace() {
        let packet = decode(r#"42/screen,12["viewer-joined","abc"]"#).unwrap();
        assert_eq!(
            packet,
            Packet::Event {
                name: "viewer-joined".into(),
                data: json!("abc")
            }
        );
    }

    #[test]
    fn connect_error_exposes_message() {
        assert_eq!(
            decode(r#"44{"message":"Not authorized"}"#).unwrap(),
            Packet::ConnectError("Not authorized".into())
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode("").is_err());
        assert!(decode("9").is_err());
        assert!(decode("42not-json").is_err());
        assert!(decode("42[]").is_err());
    }

    #[test]
    fn join_room_frames_as_event() {
        let frame = encode_signal(&OutboundSignal::JoinRoom {
            room_id: "demo-room".into(),
            role: Role::Viewer,
        })
        .unwrap();
        assert!(frame.starts_with(r#"42["join-room",{"#));
        assert_eq!(
            decode(&frame).unwrap(),
            Packet::Event {
                name: "join-room".into(),
                data: json!({ "roomId": "demo-room", "role": "viewer" })
            }
        );
    }

    #[test]
    fn answer_event_round_trips_into_inbound_signal() {
        let frame = r#"42["answer",{"viewerId":"v1","answer":{"type":"answer","sdp":"v=0"}}]"#;
        let Packet::Event { name, data } = decode(frame).unwrap() else {
            panic!("expected event");
        };
        let signal = decode_signal(&name, data).unwrap().unwrap();
        assert_eq!(
            signal,
            InboundSignal::Answer {
                viewer_id: PeerId::from("v1"),
                answer: SessionDescription {
                    kind: SdpType::Answer,
                    sdp: "v=0".into()
                }
            }
        );
    }

    #[test]
    fn candidate_event_targets_peer() {
        let mut candidate = IceCandidate::new("candidate:0 1 udp 1 192.0.2.1 9 typ host");
        candidate.sdp_mid = Some("0".into());
        candidate.sdp_mline_index = Some(0);
        let frame = encode_signal(&OutboundSignal::IceCandidate {
            target: PeerId::from("v1"),
            candidate,
        })
        .unwrap();
        assert!(frame.starts_with(r#"42["ice-candidate",{"#));
        assert!(frame.contains(r#""target":"v1""#));
        assert!(frame.contains(r#""sdpMLineIndex":0"#));
    }

    #[test]
    fn unknown_events_are_skipped() {
        assert!(decode_signal("room-full", json!({})).unwrap().is_none());
        assert!(decode_signal("offer", json!({ "nope": 1 })).is_err());
    }
}
