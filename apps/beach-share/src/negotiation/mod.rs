mod answer_slot;

pub use answer_slot::{AnswerSlot, SlotAction};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, trace, warn};

use crate::media::{LocalStream, VideoSink};
use crate::signaling::{OutboundSignal, PeerId, SignalingChannel, SignalingError};
use crate::transport::{
    IceCandidate, PeerTransport, SessionDescription, SignalingState, TransportError,
    TransportFactory,
};

#[derive(Debug, Error)]
pub enum NegotiationFailure {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Signaling(#[from] SignalingError),
}

/// A failure scoped to the negotiation with one remote participant.
#[derive(Debug, Error)]
#[error("negotiation with {peer} failed: {source}")]
pub struct NegotiationError {
    pub peer: PeerId,
    #[source]
    pub source: NegotiationFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOutcome {
    Applied,
    /// The local offer is not committed yet; the answer is buffered.
    Deferred,
    /// An answer was already applied (or is being applied) and this one was dropped.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    Added,
    /// No remote description is committed yet; the candidate is handed to
    /// the transport right after it is.
    Queued,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum OfferPhase {
    #[default]
    Idle,
    Offering,
    Sent,
}

#[derive(Debug, Default)]
struct RemoteCandidates {
    described: bool,
    queued: Vec<IceCandidate>,
}

/// Collaborators every engine of a session shares.
#[derive(Clone)]
pub struct EngineDeps {
    pub channel: Arc<dyn SignalingChannel>,
    pub factory: Arc<dyn TransportFactory>,
    pub sink: Arc<dyn VideoSink>,
}

/// Drives offer/answer and trickle ICE with exactly one remote participant.
///
/// The engine owns its transport, created lazily on first use with all
/// callbacks bound once. A remote answer that shows up before the local offer
/// is committed is held in the [`AnswerSlot`] and released by whichever comes
/// first: the transport's signaling-state callback or the explicit check at
/// the end of [`NegotiationEngine::initiate`]. Remote candidates are queued
/// until a remote description has been committed.
pub struct NegotiationEngine {
    remote: PeerId,
    this: Weak<NegotiationEngine>,
    deps: EngineDeps,
    transport: OnceCell<Arc<dyn PeerTransport>>,
    answer: Mutex<AnswerSlot>,
    offer: Mutex<OfferPhase>,
    candidates: Mutex<RemoteCandidates>,
    local_media_attached: AtomicBool,
}

impl NegotiationEngine {
    pub fn new(remote: PeerId, deps: EngineDeps) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            remote,
            this: this.clone(),
            deps,
            transport: OnceCell::new(),
            answer: Mutex::new(AnswerSlot::Empty),
            offer: Mutex::new(OfferPhase::Idle),
            candidates: Mutex::new(RemoteCandidates::default()),
            local_media_attached: AtomicBool::new(false),
        })
    }

    pub fn remote(&self) -> &PeerId {
        &self.remote
    }

    /// Current local description state; `Stable` before a transport exists.
    pub fn signaling_state(&self) -> SignalingState {
        self.transport
            .get()
            .map(|transport| transport.signaling_state())
            .unwrap_or(SignalingState::Stable)
    }

    pub fn local_media_attached(&self) -> bool {
        self.local_media_attached.load(Ordering::SeqCst)
    }

    pub fn has_pending_answer(&self) -> bool {
        self.answer.lock().is_pending()
    }

    pub fn answer_applied(&self) -> bool {
        self.answer.lock().is_applied()
    }

    pub fn offer_sent(&self) -> bool {
        *self.offer.lock() == OfferPhase::Sent
    }

    pub fn queued_candidates(&self) -> usize {
        self.candidates.lock().queued.len()
    }

    /// Sharer side: attach local media (when available), create and commit an
    /// offer, then send it to the remote viewer.
    ///
    /// Returns `false` without doing anything while an offer is in flight or
    /// already sent. After a failure the next call starts over.
    pub async fn initiate(&self, local: Option<&LocalStream>) -> Result<bool, NegotiationError> {
        {
            let mut phase = self.offer.lock();
            if *phase != OfferPhase::Idle {
                return Ok(false);
            }
            *phase = OfferPhase::Offering;
        }
        if let Err(err) = self.send_offer(local).await {
            *self.offer.lock() = OfferPhase::Idle;
            return Err(err);
        }
        *self.offer.lock() = OfferPhase::Sent;
        self.settle_pending_answer().await?;
        Ok(true)
    }

    async fn send_offer(&self, local: Option<&LocalStream>) -> Result<(), NegotiationError> {
        let transport = self.connection().await?;

        match local {
            Some(_) if self.local_media_attached() => {}
            Some(stream) => {
                for track in stream.tracks() {
                    transport
                        .add_track(Arc::clone(track))
                        .await
                        .map_err(|err| self.fail(err))?;
                }
                self.local_media_attached.store(true, Ordering::SeqCst);
                debug!(
                    peer_id = %self.remote,
                    stream = stream.id(),
                    tracks = stream.tracks().len(),
                    "local media attached"
                );
            }
            None => {
                warn!(
                    peer_id = %self.remote,
                    "capture stream not ready; offering without media"
                );
            }
        }

        let offer = transport
            .create_offer()
            .await
            .map_err(|err| self.fail(err))?;
        transport
            .set_local_description(offer.clone())
            .await
            .map_err(|err| self.fail(err))?;
        self.deps
            .channel
            .emit(OutboundSignal::Offer {
                viewer_id: self.remote.clone(),
                offer,
            })
            .map_err(|err| self.fail(err))?;
        info!(peer_id = %self.remote, "offer sent");
        Ok(())
    }

    /// Viewer side: commit the sharer's offer, answer it and send the answer
    /// back.
    pub async fn accept_offer(&self, offer: SessionDescription) -> Result<(), NegotiationError> {
        let transport = self.connection().await?;
        transport
            .set_remote_description(offer)
            .await
            .map_err(|err| self.fail(err))?;
        self.flush_candidates(transport.as_ref()).await;
        let answer = transport
            .create_answer()
            .await
            .map_err(|err| self.fail(err))?;
        transport
            .set_local_description(answer.clone())
            .await
            .map_err(|err| self.fail(err))?;
        self.deps
            .channel
            .emit(OutboundSignal::Answer {
                sharer_id: self.remote.clone(),
                answer,
            })
            .map_err(|err| self.fail(err))?;
        info!(peer_id = %self.remote, "answer sent");
        Ok(())
    }

    /// Apply the viewer's answer now if the local offer is committed,
    /// otherwise hold it until it is. Never creates a transport.
    pub async fn apply_answer(
        &self,
        answer: SessionDescription,
    ) -> Result<AnswerOutcome, NegotiationError> {
        let local = self
            .transport
            .get()
            .map_or(SignalingState::Stable, |transport| transport.signaling_state());
        let action = self.answer.lock().on_answer(answer, local);
        match action {
            SlotAction::Apply(answer) => {
                self.commit_answer(answer).await?;
                Ok(AnswerOutcome::Applied)
            }
            SlotAction::Buffer => {
                debug!(
                    peer_id = %self.remote,
                    state = %local,
                    "answer arrived before local offer; deferring"
                );
                Ok(AnswerOutcome::Deferred)
            }
            SlotAction::Discard | SlotAction::Nothing => {
                debug!(peer_id = %self.remote, "duplicate answer dropped");
                Ok(AnswerOutcome::Duplicate)
            }
        }
    }

    pub async fn add_remote_candidate(
        &self,
        candidate: IceCandidate,
    ) -> Result<CandidateOutcome, NegotiationError> {
        let transport = {
            let mut candidates = self.candidates.lock();
            match self.transport.get() {
                Some(transport) if candidates.described => Arc::clone(transport),
                _ => {
                    candidates.queued.push(candidate);
                    trace!(
                        peer_id = %self.remote,
                        queued = candidates.queued.len(),
                        "candidate queued until remote description is set"
                    );
                    return Ok(CandidateOutcome::Queued);
                }
            }
        };
        transport
            .add_ice_candidate(candidate)
            .await
            .map_err(|err| self.fail(err))?;
        Ok(CandidateOutcome::Added)
    }

    pub async fn close(&self) -> Result<(), NegotiationError> {
        if let Some(transport) = self.transport.get() {
            transport.close().await.map_err(|err| self.fail(err))?;
        }
        Ok(())
    }

    async fn connection(&self) -> Result<Arc<dyn PeerTransport>, NegotiationError> {
        let transport = self
            .transport
            .get_or_try_init(|| async {
                let transport = self.deps.factory.create(&self.remote).await?;
                self.bind_callbacks(transport.as_ref());
                debug!(target = "webrtc", peer_id = %self.remote, "transport created");
                Ok::<_, TransportError>(transport)
            })
            .await
            .map_err(|err| self.fail(err))?;
        Ok(Arc::clone(transport))
    }

    fn bind_callbacks(&self, transport: &dyn PeerTransport) {
        let channel = Arc::clone(&self.deps.channel);
        let target = self.remote.clone();
        transport.on_ice_candidate(Box::new(move |candidate| {
            let signal = OutboundSignal::IceCandidate {
                target: target.clone(),
                candidate,
            };
            if let Err(err) = channel.emit(signal) {
                warn!(peer_id = %target, error = %err, "failed to send ice candidate");
            }
        }));

        let sink = Arc::clone(&self.deps.sink);
        let peer = self.remote.clone();
        transport.on_remote_track(Box::new(move |track| {
            sink.attach(&peer, track);
        }));

        let this = self.this.clone();
        transport.on_signaling_state_change(Box::new(move |state| {
            if state != SignalingState::HaveLocalOffer {
                return;
            }
            // The transport may still be inside its own commit here, so the
            // buffered answer is applied from a fresh task.
            if let Some(engine) = this.upgrade() {
                tokio::spawn(async move {
                    if let Err(err) = engine.settle_pending_answer().await {
                        warn!(peer_id = %err.peer, error = %err, "deferred answer failed");
                    }
                });
            }
        }));
    }

    async fn settle_pending_answer(&self) -> Result<(), NegotiationError> {
        let Some(local) = self
            .transport
            .get()
            .map(|transport| transport.signaling_state())
        else {
            return Ok(());
        };
        let action = self.answer.lock().on_local_state(local);
        if let SlotAction::Apply(answer) = action {
            debug!(peer_id = %self.remote, "applying deferred answer");
            self.commit_answer(answer).await?;
        }
        Ok(())
    }

    /// Only reached through `SlotAction::Apply`, which requires a transport in
    /// `HaveLocalOffer`.
    async fn commit_answer(&self, answer: SessionDescription) -> Result<(), NegotiationError> {
        let result = match self.transport.get().cloned() {
            Some(transport) => transport
                .set_remote_description(answer)
                .await
                .map(|()| transport),
            None => Err(TransportError::Closed),
        };
        self.answer.lock().finish(result.is_ok());
        let transport = result.map_err(|err| self.fail(err))?;
        info!(peer_id = %self.remote, "answer applied");
        self.flush_candidates(transport.as_ref()).await;
        Ok(())
    }

    /// Mark the remote description as committed and hand over every
    /// candidate that arrived before it.
    async fn flush_candidates(&self, transport: &dyn PeerTransport) {
        let queued = {
            let mut candidates = self.candidates.lock();
            candidates.described = true;
            std::mem::take(&mut candidates.queued)
        };
        if !queued.is_empty() {
            debug!(peer_id = %self.remote, count = queued.len(), "flushing queued candidates");
        }
        for candidate in queued {
            if let Err(err) = transport.add_ice_candidate(candidate).await {
                warn!(peer_id = %self.remote, error = %err, "queued candidate rejected");
            }
        }
    }

    fn fail(&self, err: impl Into<NegotiationFailure>) -> NegotiationError {
        NegotiationError {
            peer: self.remote.clone(),
            source: err.into(),
        }
    }
}

impl std::fmt::Debug for NegotiationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiationEngine")
            .field("remote", &self.remote)
            .field("state", &self.signaling_state())
            .field("answer", &*self.answer.lock())
            .field("offer", &*self.offer.lock())
            .field("queued_candidates", &self.queued_candidates())
            .field("local_media_attached", &self.local_media_attached())
            .finish()
    }
}
