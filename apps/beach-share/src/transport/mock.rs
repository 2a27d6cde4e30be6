use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, watch};

use super::{
    CandidateHandler, IceCandidate, PeerTransport, RemoteTrackHandler, SdpType,
    SessionDescription, SignalingState, SignalingStateHandler, TransportError, TransportFactory,
};
use crate::media::{LocalTrack, RemoteTrack};
use crate::signaling::PeerId;

/// Remote descriptions whose SDP contains this marker are refused as
/// unparseable.
pub const MALFORMED_SDP: &str = "malformed";

/// Parks the next description commit until released, so tests can deliver
/// signaling while that commit is still in flight.
#[derive(Clone)]
pub struct CommitHold {
    inner: Arc<HoldInner>,
}

struct HoldInner {
    released: watch::Sender<bool>,
    blocked: Notify,
}

impl CommitHold {
    pub fn new() -> Self {
        let (released, _) = watch::channel(false);
        Self {
            inner: Arc::new(HoldInner {
                released,
                blocked: Notify::new(),
            }),
        }
    }

    pub fn release(&self) {
        self.inner.released.send_replace(true);
    }

    /// Resolves once a commit is parked on this hold.
    pub async fn blocked(&self) {
        self.inner.blocked.notified().await;
    }

    async fn wait(&self) {
        let mut released = self.inner.released.subscribe();
        self.inner.blocked.notify_one();
        let _ = released.wait_for(|released| *released).await;
    }
}

impl Default for CommitHold {
    fn default() -> Self {
        Self::new()
    }
}

type SharedCandidateHandler = Arc<dyn Fn(IceCandidate) + Send + Sync>;
type SharedTrackHandler = Arc<dyn Fn(RemoteTrack) + Send + Sync>;
type SharedStateHandler = Arc<dyn Fn(SignalingState) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    candidate: Option<SharedCandidateHandler>,
    track: Option<SharedTrackHandler>,
    state: Option<SharedStateHandler>,
}

struct MockState {
    signaling: SignalingState,
    offers_created: usize,
    local: Option<SessionDescription>,
    remote: Vec<SessionDescription>,
    candidates: Vec<IceCandidate>,
    tracks: Vec<String>,
    closed: bool,
}

/// In-memory transport that follows the offer/answer state rules of a real
/// peer connection without touching the network.
pub struct MockTransport {
    label: String,
    state: Mutex<MockState>,
    handlers: Mutex<Handlers>,
    hold: Mutex<Option<CommitHold>>,
    remote_hold: Mutex<Option<CommitHold>>,
    remote_applied: Notify,
}

impl MockTransport {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Mutex::new(MockState {
                signaling: SignalingState::Stable,
                offers_created: 0,
                local: None,
                remote: Vec::new(),
                candidates: Vec::new(),
                tracks: Vec::new(),
                closed: false,
            }),
            handlers: Mutex::new(Handlers::default()),
            hold: Mutex::new(None),
            remote_hold: Mutex::new(None),
            remote_applied: Notify::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn hold_next_local_commit(&self, hold: CommitHold) {
        *self.hold.lock() = Some(hold);
    }

    pub fn hold_next_remote_commit(&self, hold: CommitHold) {
        *self.remote_hold.lock() = Some(hold);
    }

    /// Fire the candidate-gathered callback as if ICE produced `candidate`.
    pub fn gather_candidate(&self, candidate: IceCandidate) {
        let handler = self.handlers.lock().candidate.clone();
        if let Some(handler) = handler {
            handler(candidate);
        }
    }

    /// Fire the remote-track callback.
    pub fn announce_remote_track(&self, track: RemoteTrack) {
        let handler = self.handlers.lock().track.clone();
        if let Some(handler) = handler {
            handler(track);
        }
    }

    pub fn offers_created(&self) -> usize {
        self.state.lock().offers_created
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    /// Every remote description accepted so far, oldest first.
    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.state.lock().remote.clone()
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().candidates.clone()
    }

    pub fn track_ids(&self) -> Vec<String> {
        self.state.lock().tracks.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub async fn wait_for_remote_descriptions(&self, count: usize) {
        loop {
            let notified = self.remote_applied.notified();
            if self.state.lock().remote.len() >= count {
                return;
            }
            notified.await;
        }
    }

    fn notify_state(&self, state: SignalingState) {
        let handler = self.handlers.lock().state.clone();
        if let Some(handler) = handler {
            handler(state);
        }
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn add_track(&self, track: LocalTrack) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        state.tracks.push(track.id().to_string());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        state.offers_created += 1;
        Ok(SessionDescription::offer(format!(
            "v=0\r\no=mock {} {}\r\ns=-\r\na=tracks:{}\r\n",
            self.label,
            state.offers_created,
            state.tracks.len()
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let state = self.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        if state.signaling != SignalingState::HaveRemoteOffer {
            return Err(TransportError::Rejected(format!(
                "cannot answer in state {}",
                state.signaling
            )));
        }
        Ok(SessionDescription::answer(format!(
            "v=0\r\no=mock {} answer\r\ns=-\r\n",
            self.label
        )))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        let hold = self.hold.lock().take();
        if let Some(hold) = hold {
            hold.wait().await;
        }
        let next = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(TransportError::Closed);
            }
            let next = match (description.kind, state.signaling) {
                (SdpType::Offer, SignalingState::Stable) => SignalingState::HaveLocalOffer,
                (SdpType::Answer, SignalingState::HaveRemoteOffer) => SignalingState::Stable,
                (kind, current) => {
                    return Err(TransportError::Rejected(format!(
                        "local {kind:?} in state {current}"
                    )));
                }
            };
            state.signaling = next;
            state.local = Some(description);
            next
        };
        self.notify_state(next);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        let hold = self.remote_hold.lock().take();
        if let Some(hold) = hold {
            hold.wait().await;
        }
        if description.sdp.trim().is_empty() || description.sdp.contains(MALFORMED_SDP) {
            return Err(TransportError::InvalidDescription(format!(
                "unparseable {:?} for {}",
                description.kind, self.label
            )));
        }
        let next = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(TransportError::Closed);
            }
            let next = match (description.kind, state.signaling) {
                (SdpType::Answer, SignalingState::HaveLocalOffer) => SignalingState::Stable,
                (SdpType::Offer, SignalingState::Stable) => SignalingState::HaveRemoteOffer,
                (kind, current) => {
                    return Err(TransportError::Rejected(format!(
                        "remote {kind:?} in state {current}"
                    )));
                }
            };
            state.signaling = next;
            state.remote.push(description);
            next
        };
        self.remote_applied.notify_waiters();
        self.notify_state(next);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        if state.remote.is_empty() {
            return Err(TransportError::Candidate(
                "no remote description yet".to_string(),
            ));
        }
        state.candidates.push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.signaling = SignalingState::Closed;
        }
        self.notify_state(SignalingState::Closed);
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        self.state.lock().signaling
    }

    fn on_ice_candidate(&self, handler: CandidateHandler) {
        self.handlers.lock().candidate = Some(Arc::from(handler));
    }

    fn on_remote_track(&self, handler: RemoteTrackHandler) {
        self.handlers.lock().track = Some(Arc::from(handler));
    }

    fn on_signaling_state_change(&self, handler: SignalingStateHandler) {
        self.handlers.lock().state = Some(Arc::from(handler));
    }
}

/// Hands out [`MockTransport`]s and keeps them reachable by peer id.
#[derive(Default)]
pub struct MockTransportFactory {
    transports: Mutex<HashMap<PeerId, Arc<MockTransport>>>,
    holds: Mutex<HashMap<PeerId, CommitHold>>,
    remote_holds: Mutex<HashMap<PeerId, CommitHold>>,
    failing: Mutex<HashSet<PeerId>>,
    created: AtomicUsize,
}

impl MockTransportFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The transport created for `peer` will park its first local commit on
    /// the returned hold.
    pub fn hold_local_commit(&self, peer: &PeerId) -> CommitHold {
        let hold = CommitHold::new();
        self.holds.lock().insert(peer.clone(), hold.clone());
        hold
    }

    /// The transport created for `peer` will park its first remote commit.
    pub fn hold_remote_commit(&self, peer: &PeerId) -> CommitHold {
        let hold = CommitHold::new();
        self.remote_holds.lock().insert(peer.clone(), hold.clone());
        hold
    }

    /// Make transport creation for `peer` fail.
    pub fn fail_for(&self, peer: &PeerId) {
        self.failing.lock().insert(peer.clone());
    }

    /// Undo [`MockTransportFactory::fail_for`].
    pub fn recover(&self, peer: &PeerId) {
        self.failing.lock().remove(peer);
    }

    pub fn transport(&self, peer: &PeerId) -> Option<Arc<MockTransport>> {
        self.transports.lock().get(peer).cloned()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create(&self, remote: &PeerId) -> Result<Arc<dyn PeerTransport>, TransportError> {
        if self.failing.lock().contains(remote) {
            return Err(TransportError::Setup(format!(
                "mock transport refused for {remote}"
            )));
        }
        let transport = Arc::new(MockTransport::new(remote.as_str()));
        if let Some(hold) = self.holds.lock().remove(remote) {
            transport.hold_next_local_commit(hold);
        }
        if let Some(hold) = self.remote_holds.lock().remove(remote) {
            transport.hold_next_remote_commit(hold);
        }
        self.transports
            .lock()
            .insert(remote.clone(), Arc::clone(&transport));
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(transport)
    }
}
