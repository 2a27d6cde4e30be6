use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::negotiation::{AnswerOutcome, CandidateOutcome, NegotiationError};
use crate::session::SessionContext;
use crate::signaling::{InboundSignal, PeerId, Role};
use crate::transport::{IceCandidate, SessionDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    RoleUnset,
    /// The event is not meant for the local role.
    WrongRole,
    /// Sharing failed to acquire media, so nobody is offered.
    CaptureFailed,
}

/// What handling one inbound event amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Ignored(IgnoreReason),
    Initiated,
    AlreadyNegotiating,
    OfferAccepted,
    Answer(AnswerOutcome),
    /// Answer from a viewer no offer was ever sent to.
    AnswerDropped,
    CandidateAdded,
    /// Candidate held by the engine until a remote description is committed.
    CandidateQueued,
    /// Candidate from a participant with no negotiation yet.
    CandidateDropped,
}

/// Routes inbound signaling to per-peer engines according to the local role.
pub struct SignalingRouter {
    ctx: Arc<SessionContext>,
}

impl SignalingRouter {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self { ctx }
    }

    pub async fn dispatch(&self, signal: InboundSignal) -> Result<Dispatch, NegotiationError> {
        let role = self.ctx.role();
        trace!(role = %role, event = signal.name(), peer_id = %signal.peer(), "inbound signal");
        match (role, signal) {
            (Role::Unset, _) => Ok(Dispatch::Ignored(IgnoreReason::RoleUnset)),
            (Role::Sharer, InboundSignal::ViewerJoined(viewer)) => {
                self.on_viewer_joined(viewer).await
            }
            (Role::Sharer, InboundSignal::Answer { viewer_id, answer }) => {
                self.on_answer(viewer_id, answer).await
            }
            (Role::Viewer, InboundSignal::Offer { sharer_id, offer }) => {
                self.on_offer(sharer_id, offer).await
            }
            (_, InboundSignal::IceCandidate { from, candidate }) => {
                self.on_candidate(from, candidate).await
            }
            (role, signal) => {
                debug!(
                    role = %role,
                    event = signal.name(),
                    peer_id = %signal.peer(),
                    "ignoring event for other role"
                );
                Ok(Dispatch::Ignored(IgnoreReason::WrongRole))
            }
        }
    }

    /// Handle every event from `inbound` on its own task so a stalled
    /// negotiation never holds up the others.
    pub fn spawn(
        self: Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<InboundSignal>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(signal) = inbound.recv().await {
                let router = Arc::clone(&self);
                tokio::spawn(async move {
                    if let Err(err) = router.dispatch(signal).await {
                        warn!(peer_id = %err.peer, error = %err, "negotiation failed");
                    }
                });
            }
            debug!("signaling inbox closed");
        })
    }

    async fn on_viewer_joined(&self, viewer: PeerId) -> Result<Dispatch, NegotiationError> {
        if self.ctx.capture_failed() {
            debug!(peer_id = %viewer, "capture failed; not offering");
            return Ok(Dispatch::Ignored(IgnoreReason::CaptureFailed));
        }
        let (engine, _) = self.ctx.engine_for(&viewer);
        let stream = self.ctx.local_stream();
        if engine.initiate(stream.as_ref()).await? {
            Ok(Dispatch::Initiated)
        } else {
            debug!(peer_id = %viewer, "viewer already negotiating");
            Ok(Dispatch::AlreadyNegotiating)
        }
    }

    async fn on_answer(
        &self,
        viewer: PeerId,
        answer: SessionDescription,
    ) -> Result<Dispatch, NegotiationError> {
        let Some(engine) = self.ctx.registry().get(&viewer) else {
            debug!(peer_id = %viewer, "answer from unknown viewer dropped");
            return Ok(Dispatch::AnswerDropped);
        };
        let outcome = engine.apply_answer(answer).await?;
        Ok(Dispatch::Answer(outcome))
    }

    async fn on_offer(
        &self,
        sharer: PeerId,
        offer: SessionDescription,
    ) -> Result<Dispatch, NegotiationError> {
        let (engine, _) = self.ctx.engine_for(&sharer);
        engine.accept_offer(offer).await?;
        Ok(Dispatch::OfferAccepted)
    }

    async fn on_candidate(
        &self,
        from: PeerId,
        candidate: IceCandidate,
    ) -> Result<Dispatch, NegotiationError> {
        let Some(engine) = self.ctx.registry().get(&from) else {
            trace!(peer_id = %from, "candidate for unknown peer dropped");
            return Ok(Dispatch::CandidateDropped);
        };
        match engine.add_remote_candidate(candidate).await? {
            CandidateOutcome::Added => Ok(Dispatch::CandidateAdded),
            CandidateOutcome::Queued => Ok(Dispatch::CandidateQueued),
        }
    }
}
