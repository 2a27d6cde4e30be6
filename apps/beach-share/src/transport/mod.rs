pub mod mock;
pub mod webrtc;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::media::{LocalTrack, RemoteTrack};
use crate::signaling::PeerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// Session description in the JSON shape browsers exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// Local description state of one connection. The transport is the source of
/// truth; callers only ever read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

impl SignalingState {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalingState::Stable => "stable",
            SignalingState::HaveLocalOffer => "have-local-offer",
            SignalingState::HaveRemoteOffer => "have-remote-offer",
            SignalingState::HaveLocalPranswer => "have-local-pranswer",
            SignalingState::HaveRemotePranswer => "have-remote-pranswer",
            SignalingState::Closed => "closed",
        }
    }
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport setup failed: {0}")]
    Setup(String),
    #[error("description rejected: {0}")]
    Rejected(String),
    #[error("invalid session description: {0}")]
    InvalidDescription(String),
    #[error("candidate rejected: {0}")]
    Candidate(String),
    #[error("transport closed")]
    Closed,
}

pub type CandidateHandler = Box<dyn Fn(IceCandidate) + Send + Sync>;
pub type RemoteTrackHandler = Box<dyn Fn(RemoteTrack) + Send + Sync>;
pub type SignalingStateHandler = Box<dyn Fn(SignalingState) + Send + Sync>;

/// Capability set one negotiation needs from a media transport. Handlers run
/// on the transport's own task and must not block.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn add_track(&self, track: LocalTrack) -> Result<(), TransportError>;
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;
    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;
    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError>;
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;
    async fn close(&self) -> Result<(), TransportError>;

    fn signaling_state(&self) -> SignalingState;

    fn on_ice_candidate(&self, handler: CandidateHandler);
    fn on_remote_track(&self, handler: RemoteTrackHandler);
    fn on_signaling_state_change(&self, handler: SignalingStateHandler);
}

/// Builds one transport per remote participant.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self, remote: &PeerId) -> Result<Arc<dyn PeerTransport>, TransportError>;
}
