#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use beach_share::media::{
    CaptureError, CaptureSource, LocalStream, LocalTrack, RemoteTrack, VideoSink, vp8_track,
};
use beach_share::signaling::memory::{MemoryChannel, MemoryRelay};
use beach_share::transport::mock::{MockTransport, MockTransportFactory};
use beach_share::transport::{IceCandidate, SessionDescription};
use beach_share::{
    InboundSignal, PeerId, SessionContext, SessionController, SignalingChannel, SignalingRouter,
};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

pub const ROOM: &str = "demo-room";

pub fn screen_stream() -> LocalStream {
    let track: LocalTrack = vp8_track("screen", "test-screen");
    LocalStream::new("test-screen", vec![track])
}

/// Capture that succeeds with a fixed stream, optionally after being released.
pub struct StaticCapture {
    stream: LocalStream,
    gate: Option<Arc<Notify>>,
}

impl StaticCapture {
    pub fn ready() -> Arc<Self> {
        Arc::new(Self {
            stream: screen_stream(),
            gate: None,
        })
    }

    /// Capture that stays pending until the returned notify fires.
    pub fn gated() -> (Arc<Self>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        (
            Arc::new(Self {
                stream: screen_stream(),
                gate: Some(Arc::clone(&gate)),
            }),
            gate,
        )
    }
}

#[async_trait]
impl CaptureSource for StaticCapture {
    async fn acquire(&self) -> Result<LocalStream, CaptureError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(self.stream.clone())
    }
}

pub struct DeniedCapture;

#[async_trait]
impl CaptureSource for DeniedCapture {
    async fn acquire(&self) -> Result<LocalStream, CaptureError> {
        Err(CaptureError::Denied("user dismissed the picker".into()))
    }
}

/// Capture that fails a fixed number of times before succeeding.
pub struct FlakyCapture {
    failures_left: AtomicUsize,
}

impl FlakyCapture {
    pub fn failing(times: usize) -> Arc<Self> {
        Arc::new(Self {
            failures_left: AtomicUsize::new(times),
        })
    }
}

#[async_trait]
impl CaptureSource for FlakyCapture {
    async fn acquire(&self) -> Result<LocalStream, CaptureError> {
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(CaptureError::Source("capture device busy".into()));
        }
        Ok(screen_stream())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    attached: Mutex<Vec<(PeerId, String)>>,
}

impl RecordingSink {
    pub fn attached(&self) -> Vec<(PeerId, String)> {
        self.attached.lock().clone()
    }
}

impl VideoSink for RecordingSink {
    fn attach(&self, peer: &PeerId, track: RemoteTrack) {
        self.attached.lock().push((peer.clone(), track.track_id));
    }
}

/// One participant wired to an in-memory relay with mock transports.
pub struct Participant {
    pub id: PeerId,
    pub channel: Arc<MemoryChannel>,
    pub inbox: mpsc::UnboundedReceiver<InboundSignal>,
    pub factory: Arc<MockTransportFactory>,
    pub sink: Arc<RecordingSink>,
    pub ctx: Arc<SessionContext>,
    pub router: Arc<SignalingRouter>,
    pub controller: Arc<SessionController>,
}

impl Participant {
    pub fn join(relay: &Arc<MemoryRelay>, id: &str, capture: Arc<dyn CaptureSource>) -> Self {
        let (channel, inbox) = relay.connect_as(id);
        let factory = MockTransportFactory::new();
        let sink = Arc::new(RecordingSink::default());
        let signaling: Arc<dyn SignalingChannel> = channel.clone();
        let ctx = SessionContext::new(ROOM, signaling, factory.clone(), sink.clone());
        Self {
            id: PeerId::from(id),
            channel,
            inbox,
            factory,
            sink,
            router: Arc::new(SignalingRouter::new(Arc::clone(&ctx))),
            controller: Arc::new(SessionController::new(Arc::clone(&ctx), capture)),
            ctx,
        }
    }

    pub fn sharer(relay: &Arc<MemoryRelay>, id: &str) -> Self {
        Self::join(relay, id, StaticCapture::ready())
    }

    pub fn viewer(relay: &Arc<MemoryRelay>, id: &str) -> Self {
        Self::join(relay, id, StaticCapture::ready())
    }

    pub async fn next_signal(&mut self) -> InboundSignal {
        self.inbox.recv().await.expect("relay inbox closed")
    }

    pub fn transport(&self, peer: &str) -> Arc<MockTransport> {
        self.factory
            .transport(&PeerId::from(peer))
            .expect("no transport for peer")
    }
}

pub fn candidate(n: u16) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2130706431 192.0.2.{n} 50000 typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

pub fn offer_sdp(tag: &str) -> SessionDescription {
    SessionDescription::offer(format!("v=0\r\no=sharer {tag}\r\ns=-\r\n"))
}

pub fn answer_sdp(tag: &str) -> SessionDescription {
    SessionDescription::answer(format!("v=0\r\no=viewer {tag}\r\ns=-\r\n"))
}
