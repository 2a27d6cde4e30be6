use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};
use webrtc::api::media_engine::MIME_TYPE_VP8;
use webrtc::media::Sample;
use webrtc::media::io::ivf_reader::IVFReader;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use crate::signaling::PeerId;

pub type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;

const SCREEN_STREAM_ID: &str = "beach-share-screen";
const SCREEN_TRACK_ID: &str = "screen";
const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// Outgoing media captured once per session and shared read-only by every
/// negotiation.
#[derive(Clone)]
pub struct LocalStream {
    id: String,
    tracks: Vec<LocalTrack>,
}

impl LocalStream {
    pub fn new(id: impl Into<String>, tracks: Vec<LocalTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }
}

impl fmt::Debug for LocalStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<&str> = self.tracks.iter().map(|track| track.id()).collect();
        f.debug_struct("LocalStream")
            .field("id", &self.id)
            .field("tracks", &ids)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
    Unknown,
}

impl From<RTPCodecType> for MediaKind {
    fn from(value: RTPCodecType) -> Self {
        match value {
            RTPCodecType::Audio => MediaKind::Audio,
            RTPCodecType::Video => MediaKind::Video,
            _ => MediaKind::Unknown,
        }
    }
}

/// Incoming track announced by a transport. `source` is absent for tracks
/// that do not come from a real peer connection.
#[derive(Clone)]
pub struct RemoteTrack {
    pub track_id: String,
    pub stream_id: String,
    pub kind: MediaKind,
    pub source: Option<Arc<TrackRemote>>,
}

impl RemoteTrack {
    pub fn detached(track_id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self {
            track_id: track_id.into(),
            stream_id: stream_id.into(),
            kind: MediaKind::Video,
            source: None,
        }
    }
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("track_id", &self.track_id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .field("live", &self.source.is_some())
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("screen capture denied: {0}")]
    Denied(String),
    #[error("capture source failed: {0}")]
    Source(String),
    #[error("capture io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Produces the sharer's outgoing stream.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    async fn acquire(&self) -> Result<LocalStream, CaptureError>;
}

/// Receives remote tracks once a viewer's connection reports them.
pub trait VideoSink: Send + Sync {
    fn attach(&self, peer: &PeerId, track: RemoteTrack);
}

pub fn vp8_track(track_id: &str, stream_id: &str) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90_000,
            ..Default::default()
        },
        track_id.to_owned(),
        stream_id.to_owned(),
    ))
}

/// A VP8 track that never carries frames. Enough for the offer to announce a
/// video section when no file is supplied.
#[derive(Debug, Default)]
pub struct PlaceholderCapture;

#[async_trait]
impl CaptureSource for PlaceholderCapture {
    async fn acquire(&self) -> Result<LocalStream, CaptureError> {
        let track: LocalTrack = vp8_track(SCREEN_TRACK_ID, SCREEN_STREAM_ID);
        Ok(LocalStream::new(SCREEN_STREAM_ID, vec![track]))
    }
}

/// Loops the frames of an IVF (VP8) file onto the outgoing track.
#[derive(Debug, Clone)]
pub struct IvfFileCapture {
    path: PathBuf,
}

impl IvfFileCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CaptureSource for IvfFileCapture {
    async fn acquire(&self) -> Result<LocalStream, CaptureError> {
        let file = File::open(&self.path)?;
        let (_, header) = IVFReader::new(BufReader::new(file))
            .map_err(|err| CaptureError::Source(format!("{}: {err}", self.path.display())))?;
        if &header.four_cc != b"VP80" {
            return Err(CaptureError::Source(format!(
                "{} is not a VP8 stream",
                self.path.display()
            )));
        }
        let interval = frame_interval(header.timebase_numerator, header.timebase_denominator);
        let track = vp8_track(SCREEN_TRACK_ID, SCREEN_STREAM_ID);
        info!(
            path = %self.path.display(),
            width = header.width,
            height = header.height,
            frame_ms = interval.as_millis() as u64,
            "ivf capture opened"
        );

        let path = self.path.clone();
        let writer = Arc::clone(&track);
        tokio::spawn(async move {
            if let Err(err) = pump_ivf(path, writer, interval).await {
                warn!(error = %err, "ivf capture stopped");
            }
        });

        let track: LocalTrack = track;
        Ok(LocalStream::new(SCREEN_STREAM_ID, vec![track]))
    }
}

fn frame_interval(numerator: u32, denominator: u32) -> Duration {
    if numerator == 0 || denominator == 0 {
        return DEFAULT_FRAME_INTERVAL;
    }
    Duration::from_millis(1000 * u64::from(numerator) / u64::from(denominator))
        .max(Duration::from_millis(1))
}

async fn pump_ivf(
    path: PathBuf,
    track: Arc<TrackLocalStaticSample>,
    interval: Duration,
) -> Result<(), CaptureError> {
    let mut ticker = tokio::time::interval(interval);
    loop {
        let file = File::open(&path)?;
        let (mut reader, _) = IVFReader::new(BufReader::new(file))
            .map_err(|err| CaptureError::Source(err.to_string()))?;
        let mut frames = 0u64;
        while let Ok((frame, _)) = reader.parse_next_frame() {
            ticker.tick().await;
            let sample = Sample {
                data: frame.freeze(),
                duration: interval,
                ..Default::default()
            };
            track
                .write_sample(&sample)
                .await
                .map_err(|err| CaptureError::Source(err.to_string()))?;
            frames += 1;
        }
        if frames == 0 {
            return Err(CaptureError::Source(format!(
                "{} contains no frames",
                path.display()
            )));
        }
        debug!(frames, "ivf capture looping");
    }
}

/// Logs track arrival and counts RTP packets per remote track.
#[derive(Debug, Default)]
pub struct LoggingSink;

const PACKET_LOG_EVERY: u64 = 300;

impl VideoSink for LoggingSink {
    fn attach(&self, peer: &PeerId, track: RemoteTrack) {
        info!(
            peer_id = %peer,
            track_id = %track.track_id,
            stream_id = %track.stream_id,
            kind = ?track.kind,
            "remote track attached"
        );
        let Some(source) = track.source else {
            return;
        };
        let peer = peer.clone();
        tokio::spawn(async move {
            let mut packets = 0u64;
            while source.read_rtp().await.is_ok() {
                packets += 1;
                if packets % PACKET_LOG_EVERY == 0 {
                    info!(peer_id = %peer, packets, "remote video flowing");
                }
            }
            debug!(peer_id = %peer, packets, "remote track ended");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_interval_follows_timebase() {
        assert_eq!(frame_interval(1, 30), Duration::from_millis(33));
        assert_eq!(frame_interval(0, 30), DEFAULT_FRAME_INTERVAL);
        assert_eq!(frame_interval(1, 0), DEFAULT_FRAME_INTERVAL);
    }

    #[tokio::test]
    async fn placeholder_capture_yields_one_video_track() {
        let stream = PlaceholderCapture.acquire().await.unwrap();
        assert_eq!(stream.id(), SCREEN_STREAM_ID);
        assert_eq!(stream.tracks().len(), 1);
        assert_eq!(stream.tracks()[0].kind(), RTPCodecType::Video);
    }

    #[tokio::test]
    async fn missing_ivf_file_is_an_io_error() {
        let capture = IvfFileCapture::new("/definitely/not/here.ivf");
        let err = capture.acquire().await.unwrap_err();
        assert!(matches!(err, CaptureError::Io(_)));
    }
}
