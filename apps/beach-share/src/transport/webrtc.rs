use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

use super::{
    CandidateHandler, IceCandidate, PeerTransport, RemoteTrackHandler, SdpType,
    SessionDescription, SignalingState, SignalingStateHandler, TransportError, TransportFactory,
};
use crate::media::{LocalTrack, RemoteTrack};
use crate::signaling::PeerId;

fn to_setup_error(err: impl std::fmt::Display) -> TransportError {
    TransportError::Setup(err.to_string())
}

fn build_api(setting: SettingEngine) -> Result<API, TransportError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(to_setup_error)?;

    let mut registry = Registry::new();
    registry =
        register_default_interceptors(registry, &mut media_engine).map_err(to_setup_error)?;

    Ok(APIBuilder::new()
        .with_setting_engine(setting)
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

/// Builds one `RTCPeerConnection` per remote participant, all sharing a
/// single media engine and ICE server list.
pub struct WebRtcTransportFactory {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcTransportFactory {
    pub fn new(ice_servers: Vec<RTCIceServer>) -> Result<Self, TransportError> {
        Ok(Self {
            api: build_api(SettingEngine::default())?,
            ice_servers,
        })
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(&self, remote: &PeerId) -> Result<Arc<dyn PeerTransport>, TransportError> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        let pc = self
            .api
            .new_peer_connection(config)
            .await
            .map_err(to_setup_error)?;

        let peer = remote.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            debug!(target = "webrtc", peer_id = %peer, ?state, "peer connection state changed");
            Box::pin(async {})
        }));

        Ok(Arc::new(WebRtcPeer {
            remote: remote.clone(),
            pc: Arc::new(pc),
        }))
    }
}

/// [`PeerTransport`] over a real `RTCPeerConnection`.
pub struct WebRtcPeer {
    remote: PeerId,
    pc: Arc<RTCPeerConnection>,
}

fn to_rtc_description(
    description: SessionDescription,
) -> Result<RTCSessionDescription, TransportError> {
    let invalid = |err: webrtc::Error| TransportError::InvalidDescription(err.to_string());
    match description.kind {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp).map_err(invalid),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp).map_err(invalid),
        SdpType::Pranswer => RTCSessionDescription::pranswer(description.sdp).map_err(invalid),
        SdpType::Rollback => {
            let mut rollback = RTCSessionDescription::default();
            rollback.sdp_type = RTCSdpType::Rollback;
            Ok(rollback)
        }
    }
}

fn from_rtc_description(
    description: RTCSessionDescription,
) -> Result<SessionDescription, TransportError> {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => {
            return Err(TransportError::InvalidDescription(
                "description without type".into(),
            ));
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: description.sdp,
    })
}

fn from_rtc_state(state: RTCSignalingState) -> SignalingState {
    match state {
        RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
        RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
        RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
        RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
        RTCSignalingState::Closed => SignalingState::Closed,
        RTCSignalingState::Stable | RTCSignalingState::Unspecified => SignalingState::Stable,
    }
}

#[async_trait]
impl PeerTransport for WebRtcPeer {
    async fn add_track(&self, track: LocalTrack) -> Result<(), TransportError> {
        let sender = self.pc.add_track(track).await.map_err(to_setup_error)?;
        // RTCP has to be drained for interceptors such as NACK to work.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|err| TransportError::Rejected(err.to_string()))?;
        from_rtc_description(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|err| TransportError::Rejected(err.to_string()))?;
        from_rtc_description(answer)
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        let description = to_rtc_description(description)?;
        self.pc
            .set_local_description(description)
            .await
            .map_err(|err| TransportError::Rejected(err.to_string()))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        let description = to_rtc_description(description)?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(|err| TransportError::Rejected(err.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|err| TransportError::Candidate(err.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.pc.close().await.map_err(to_setup_error)
    }

    fn signaling_state(&self) -> SignalingState {
        from_rtc_state(self.pc.signaling_state())
    }

    fn on_ice_candidate(&self, handler: CandidateHandler) {
        let peer = self.remote.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                match candidate.map(|candidate| candidate.to_json()) {
                    Some(Ok(init)) => handler(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    }),
                    Some(Err(err)) => {
                        debug!(target = "webrtc", peer_id = %peer, error = %err, "unserializable candidate");
                    }
                    None => {
                        trace!(target = "webrtc", peer_id = %peer, "candidate gathering complete");
                    }
                }
                Box::pin(async {})
            }));
    }

    fn on_remote_track(&self, handler: RemoteTrackHandler) {
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                handler(RemoteTrack {
                    track_id: track.id(),
                    stream_id: track.stream_id(),
                    kind: track.kind().into(),
                    source: Some(track),
                });
                Box::pin(async {})
            },
        ));
    }

    fn on_signaling_state_change(&self, handler: SignalingStateHandler) {
        let peer = self.remote.clone();
        self.pc
            .on_signaling_state_change(Box::new(move |state: RTCSignalingState| {
                trace!(target = "webrtc", peer_id = %peer, %state, "signaling state changed");
                handler(from_rtc_state(state));
                Box::pin(async {})
            }));
    }
}
