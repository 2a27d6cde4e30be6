pub mod memory;
pub mod socket_io;
pub mod websocket;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::{IceCandidate, SessionDescription};

/// Participant id handed out by the signaling relay. Stable for one
/// connection, opaque otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Unset,
    Sharer,
    Viewer,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Unset => "unset",
            Role::Sharer => "sharer",
            Role::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events this participant sends to the relay. Serialized adjacently tagged
/// so the Socket.IO codec can split them into `[event, data]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundSignal {
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: String, role: Role },
    #[serde(rename_all = "camelCase")]
    Offer {
        viewer_id: PeerId,
        offer: SessionDescription,
    },
    #[serde(rename_all = "camelCase")]
    Answer {
        sharer_id: PeerId,
        answer: SessionDescription,
    },
    IceCandidate {
        target: PeerId,
        candidate: IceCandidate,
    },
}

impl OutboundSignal {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundSignal::JoinRoom { .. } => "join-room",
            OutboundSignal::Offer { .. } => "offer",
            OutboundSignal::Answer { .. } => "answer",
            OutboundSignal::IceCandidate { .. } => "ice-candidate",
        }
    }
}

/// Events the relay delivers to this participant, already stamped with the
/// sender's id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum InboundSignal {
    ViewerJoined(PeerId),
    #[serde(rename_all = "camelCase")]
    Offer {
        sharer_id: PeerId,
        offer: SessionDescription,
    },
    #[serde(rename_all = "camelCase")]
    Answer {
        viewer_id: PeerId,
        answer: SessionDescription,
    },
    IceCandidate {
        from: PeerId,
        candidate: IceCandidate,
    },
}

impl InboundSignal {
    pub fn name(&self) -> &'static str {
        match self {
            InboundSignal::ViewerJoined(_) => "viewer-joined",
            InboundSignal::Offer { .. } => "offer",
            InboundSignal::Answer { .. } => "answer",
            InboundSignal::IceCandidate { .. } => "ice-candidate",
        }
    }

    /// The remote participant this event concerns.
    pub fn peer(&self) -> &PeerId {
        match self {
            InboundSignal::ViewerJoined(peer) => peer,
            InboundSignal::Offer { sharer_id, .. } => sharer_id,
            InboundSignal::Answer { viewer_id, .. } => viewer_id,
            InboundSignal::IceCandidate { from, .. } => from,
        }
    }
}

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("invalid signaling url: {0}")]
    InvalidUrl(String),
    #[error("signaling connect failed: {0}")]
    Connect(String),
    #[error("signaling protocol error: {0}")]
    Protocol(String),
    #[error("failed to encode signaling payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("signaling channel closed")]
    ChannelClosed,
}

/// Outbound half of the room-scoped relay connection. Inbound events are
/// delivered on the receiver returned when the channel is opened.
pub trait SignalingChannel: Send + Sync {
    /// Id the relay assigned to this participant, once known.
    fn local_id(&self) -> Option<PeerId>;

    fn emit(&self, signal: OutboundSignal) -> Result<(), SignalingError>;
}
