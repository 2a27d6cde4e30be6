use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message, error::ProtocolError},
};
use tracing::{debug, info, trace, warn};
use url::Url;

use super::socket_io::{self, Packet};
use super::{InboundSignal, OutboundSignal, PeerId, SignalingChannel, SignalingError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Socket.IO client for the room relay, running over a plain websocket.
pub struct SocketIoChannel {
    local_id: Arc<RwLock<Option<PeerId>>>,
    send_tx: mpsc::UnboundedSender<String>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SocketIoChannel {
    /// Connect to the relay at `signaling_url` (an `http(s)` or `ws(s)` base
    /// URL) and wait for the namespace connect acknowledgement.
    pub async fn connect(
        signaling_url: &str,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<InboundSignal>), SignalingError> {
        let websocket_url = derive_websocket_url(signaling_url)?;
        let (ws_stream, _) = connect_async(websocket_url.as_str())
            .await
            .map_err(|err| SignalingError::Connect(format!("websocket connect failed: {err}")))?;
        debug!(
            target = "webrtc",
            url = %websocket_url,
            "signaling websocket connected"
        );
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (send_tx, mut send_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<InboundSignal>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<PeerId, SignalingError>>();
        let local_id = Arc::new(RwLock::new(None));

        let writer_handle = tokio::spawn(async move {
            while let Some(frame) = send_rx.recv().await {
                trace!(target = "webrtc", event = "ws_out", len = frame.len());
                if ws_write.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            let _ = ws_write.close().await;
        });

        let reply_tx = send_tx.clone();
        let reader_local_id = Arc::clone(&local_id);
        let reader_handle = tokio::spawn(async move {
            let mut ready = Some(ready_tx);
            while let Some(message) = ws_read.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(err) => {
                        match &err {
                            WsError::ConnectionClosed
                            | WsError::AlreadyClosed
                            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                                debug!(target = "webrtc", "signaling websocket closed: {err}");
                            }
                            _ => {
                                warn!(target = "webrtc", "signaling websocket error: {err}");
                            }
                        }
                        break;
                    }
                };
                trace!(target = "webrtc", event = "ws_in", len = text.len());
                let packet = match socket_io::decode(&text) {
                    Ok(packet) => packet,
                    Err(err) => {
                        warn!(target = "webrtc", error = %err, "dropping signaling frame");
                        continue;
                    }
                };
                match packet {
                    Packet::Open(handshake) => {
                        debug!(
                            target = "webrtc",
                            sid = %handshake.sid,
                            ping_interval_ms = handshake.ping_interval,
                            "engine.io session opened"
                        );
                        if send_packet(&reply_tx, &Packet::Connect { sid: None }).is_err() {
                            break;
                        }
                    }
                    Packet::Ping(probe) => {
                        if send_packet(&reply_tx, &Packet::Pong(probe)).is_err() {
                            break;
                        }
                    }
                    Packet::Connect { sid: Some(sid) } => {
                        let id = PeerId::new(sid);
                        *reader_local_id.write() = Some(id.clone());
                        if let Some(ready) = ready.take() {
                            let _ = ready.send(Ok(id));
                        }
                    }
                    Packet::Connect { sid: None } => {
                        if let Some(ready) = ready.take() {
                            let _ = ready.send(Err(SignalingError::Protocol(
                                "connect acknowledgement without sid".into(),
                            )));
                        }
                    }
                    Packet::ConnectError(reason) => {
                        if let Some(ready) = ready.take() {
                            let _ = ready.send(Err(SignalingError::Connect(reason)));
                        } else {
                            warn!(target = "webrtc", %reason, "signaling connect error");
                        }
                        break;
                    }
                    Packet::Event { name, data } => match socket_io::decode_signal(&name, data) {
                        Ok(Some(signal)) => {
                            if inbound_tx.send(signal).is_err() {
                                break;
                            }
                        }
                        Ok(None) => {
                            trace!(target = "webrtc", event = %name, "ignoring unknown event");
                        }
                        Err(err) => {
                            warn!(target = "webrtc", error = %err, "malformed signaling event");
                        }
                    },
                    Packet::Close | Packet::Disconnect => break,
                    Packet::Pong(_) | Packet::Noop => {}
                }
            }
            if let Some(ready) = ready.take() {
                let _ = ready.send(Err(SignalingError::ChannelClosed));
            }
            debug!(target = "webrtc", "signaling reader finished");
        });

        let channel = Arc::new(SocketIoChannel {
            local_id,
            send_tx,
            tasks: Mutex::new(vec![writer_handle, reader_handle]),
        });

        let local = tokio::time::timeout(CONNECT_TIMEOUT, ready_rx)
            .await
            .map_err(|_| SignalingError::Connect("timed out waiting for socket.io connect".into()))?
            .map_err(|_| SignalingError::ChannelClosed)??;
        info!(target = "webrtc", peer_id = %local, "signaling connected");
        Ok((channel, inbound_rx))
    }
}

impl SignalingChannel for SocketIoChannel {
    fn local_id(&self) -> Option<PeerId> {
        self.local_id.read().clone()
    }

    fn emit(&self, signal: OutboundSignal) -> Result<(), SignalingError> {
        let frame = socket_io::encode_signal(&signal)?;
        debug!(target = "webrtc", event = signal.name(), "signal out");
        self.send_tx
            .send(frame)
            .map_err(|_| SignalingError::ChannelClosed)
    }
}

impl Drop for SocketIoChannel {
    fn drop(&mut self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }
}

fn send_packet(tx: &mpsc::UnboundedSender<String>, packet: &Packet) -> Result<(), SignalingError> {
    let frame = socket_io::encode(packet)?;
    tx.send(frame).map_err(|_| SignalingError::ChannelClosed)
}

/// `http://host:3000/base` becomes `ws://host:3000/base/socket.io/?EIO=4&transport=websocket`.
pub fn derive_websocket_url(signaling_url: &str) -> Result<Url, SignalingError> {
    let base = Url::parse(signaling_url)
        .map_err(|err| SignalingError::InvalidUrl(format!("{signaling_url}: {err}")))?;
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(SignalingError::InvalidUrl(format!(
                "unsupported scheme {other} in {signaling_url}"
            )));
        }
    };
    let mut ws = base.clone();
    ws.set_scheme(scheme)
        .map_err(|_| SignalingError::InvalidUrl("invalid websocket scheme".into()))?;
    let prefix = base.path().trim_end_matches('/');
    ws.set_path(&format!("{prefix}/socket.io/"));
    ws.set_query(Some("EIO=4&transport=websocket"));
    ws.set_fragment(None);
    Ok(ws)
}
