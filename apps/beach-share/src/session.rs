use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::media::{CaptureError, CaptureSource, LocalStream, VideoSink};
use crate::negotiation::{EngineDeps, NegotiationEngine};
use crate::registry::PeerRegistry;
use crate::signaling::{OutboundSignal, PeerId, Role, SignalingChannel, SignalingError};
use crate::transport::TransportFactory;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session already started as {current}, cannot become {requested}")]
    RoleConflict { current: Role, requested: Role },
    #[error(transparent)]
    Signaling(#[from] SignalingError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

#[derive(Debug, Clone, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    Acquiring,
    Ready(LocalStream),
    Failed,
}

/// State shared by the router and the controller for one session.
pub struct SessionContext {
    room_id: String,
    role: RwLock<Role>,
    capture: RwLock<CaptureState>,
    registry: PeerRegistry<NegotiationEngine>,
    deps: EngineDeps,
}

impl SessionContext {
    pub fn new(
        room_id: impl Into<String>,
        channel: Arc<dyn SignalingChannel>,
        factory: Arc<dyn TransportFactory>,
        sink: Arc<dyn VideoSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            room_id: room_id.into(),
            role: RwLock::new(Role::Unset),
            capture: RwLock::new(CaptureState::Idle),
            registry: PeerRegistry::new(),
            deps: EngineDeps {
                channel,
                factory,
                sink,
            },
        })
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn role(&self) -> Role {
        *self.role.read()
    }

    pub fn registry(&self) -> &PeerRegistry<NegotiationEngine> {
        &self.registry
    }

    pub fn channel(&self) -> &Arc<dyn SignalingChannel> {
        &self.deps.channel
    }

    pub fn capture_state(&self) -> CaptureState {
        self.capture.read().clone()
    }

    pub fn local_stream(&self) -> Option<LocalStream> {
        match &*self.capture.read() {
            CaptureState::Ready(stream) => Some(stream.clone()),
            _ => None,
        }
    }

    pub fn capture_failed(&self) -> bool {
        matches!(*self.capture.read(), CaptureState::Failed)
    }

    /// Existing engine for `peer`, or a fresh one registered before any
    /// negotiation step runs.
    pub fn engine_for(&self, peer: &PeerId) -> (Arc<NegotiationEngine>, bool) {
        self.registry.get_or_create(peer, || {
            NegotiationEngine::new(peer.clone(), self.deps.clone())
        })
    }

    /// Set the role once. Returns `false` when the same role was already set.
    fn claim_role(&self, requested: Role) -> Result<bool, SessionError> {
        let mut role = self.role.write();
        match *role {
            Role::Unset => {
                *role = requested;
                Ok(true)
            }
            current if current == requested => Ok(false),
            current => Err(SessionError::RoleConflict { current, requested }),
        }
    }

    /// Move a failed capture back to `Acquiring`. Returns `false` for any
    /// other capture state.
    fn restart_failed_capture(&self) -> bool {
        let mut capture = self.capture.write();
        if matches!(*capture, CaptureState::Failed) {
            *capture = CaptureState::Acquiring;
            true
        } else {
            false
        }
    }

    fn set_capture(&self, state: CaptureState) {
        *self.capture.write() = state;
    }
}

/// Entry points that pick the local role and join the room.
pub struct SessionController {
    ctx: Arc<SessionContext>,
    capture: Arc<dyn CaptureSource>,
}

impl SessionController {
    pub fn new(ctx: Arc<SessionContext>, capture: Arc<dyn CaptureSource>) -> Self {
        Self { ctx, capture }
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    /// Become the sharer, announce it to the room and acquire the outgoing
    /// stream. Viewers that join while capture is pending get an offer without
    /// media. Calling this again after a failed capture retries the capture
    /// without rejoining.
    pub async fn start_sharing(&self) -> Result<(), SessionError> {
        if self.ctx.claim_role(Role::Sharer)? {
            self.ctx.channel().emit(OutboundSignal::JoinRoom {
                room_id: self.ctx.room_id.clone(),
                role: Role::Sharer,
            })?;
            info!(room = %self.ctx.room_id, role = %Role::Sharer, "joined room");
            self.ctx.set_capture(CaptureState::Acquiring);
        } else if self.ctx.restart_failed_capture() {
            info!(room = %self.ctx.room_id, "retrying screen capture");
        } else {
            debug!(room = %self.ctx.room_id, "already sharing");
            return Ok(());
        }

        match self.capture.acquire().await {
            Ok(stream) => {
                info!(
                    stream = stream.id(),
                    tracks = stream.tracks().len(),
                    "capture stream ready"
                );
                self.ctx.set_capture(CaptureState::Ready(stream));
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "screen capture failed; viewers will not be offered");
                self.ctx.set_capture(CaptureState::Failed);
                Err(SessionError::Capture(err))
            }
        }
    }

    pub async fn start_viewing(&self) -> Result<(), SessionError> {
        if !self.ctx.claim_role(Role::Viewer)? {
            debug!(room = %self.ctx.room_id, "already viewing");
            return Ok(());
        }
        self.ctx.channel().emit(OutboundSignal::JoinRoom {
            room_id: self.ctx.room_id.clone(),
            role: Role::Viewer,
        })?;
        info!(room = %self.ctx.room_id, role = %Role::Viewer, "joined room");
        Ok(())
    }

    /// Close every peer connection of the session.
    pub async fn shutdown(&self) {
        for engine in self.ctx.registry.all() {
            if let Err(err) = engine.close().await {
                warn!(peer_id = %err.peer, error = %err, "failed to close peer");
            }
        }
        debug!(peers = self.ctx.registry.len(), "session shut down");
    }
}
