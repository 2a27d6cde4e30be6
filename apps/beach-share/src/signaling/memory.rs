use std::sync::Arc;

use parking_lot::Mutex;
use room_bus::RoomBus;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::{InboundSignal, OutboundSignal, PeerId, Role, SignalingChannel, SignalingError};

/// In-process stand-in for the room relay. Routes events between connected
/// participants the same way the Socket.IO relay does.
#[derive(Default)]
pub struct MemoryRelay {
    bus: RoomBus<InboundSignal>,
}

impl MemoryRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Connect a participant under a freshly generated id.
    pub fn connect(
        self: &Arc<Self>,
    ) -> (Arc<MemoryChannel>, mpsc::UnboundedReceiver<InboundSignal>) {
        self.connect_as(Uuid::new_v4().to_string())
    }

    pub fn connect_as(
        self: &Arc<Self>,
        id: impl Into<PeerId>,
    ) -> (Arc<MemoryChannel>, mpsc::UnboundedReceiver<InboundSignal>) {
        let id = id.into();
        let inbox = self.bus.connect(id.as_str());
        let channel = Arc::new(MemoryChannel {
            id,
            relay: Arc::clone(self),
            sent: Mutex::new(Vec::new()),
        });
        (channel, inbox)
    }

    fn route(&self, from: &PeerId, signal: OutboundSignal) -> Result<(), SignalingError> {
        let sender = from.clone();
        let delivery = match signal {
            OutboundSignal::JoinRoom { room_id, role } => {
                self.bus
                    .join(from.as_str(), &room_id, Some(role.as_str()))
                    .map_err(|_| SignalingError::ChannelClosed)?;
                if role == Role::Viewer {
                    let reached = self.bus.broadcast(
                        from.as_str(),
                        Some(Role::Sharer.as_str()),
                        InboundSignal::ViewerJoined(sender),
                    );
                    debug!(peer_id = %from, room = %room_id, ?reached, "viewer announced");
                }
                return Ok(());
            }
            OutboundSignal::Offer { viewer_id, offer } => self.bus.send_to(
                from.as_str(),
                viewer_id.as_str(),
                InboundSignal::Offer {
                    sharer_id: sender,
                    offer,
                },
            ),
            OutboundSignal::Answer { sharer_id, answer } => self.bus.send_to(
                from.as_str(),
                sharer_id.as_str(),
                InboundSignal::Answer {
                    viewer_id: sender,
                    answer,
                },
            ),
            OutboundSignal::IceCandidate { target, candidate } => self.bus.send_to(
                from.as_str(),
                target.as_str(),
                InboundSignal::IceCandidate {
                    from: sender,
                    candidate,
                },
            ),
        };
        // The relay drops events for participants that are gone or elsewhere.
        if let Err(err) = delivery {
            debug!(peer_id = %from, error = %err, "relay dropped event");
        }
        Ok(())
    }
}

/// One participant's connection to a [`MemoryRelay`]. Every emitted signal is
/// also recorded for inspection.
pub struct MemoryChannel {
    id: PeerId,
    relay: Arc<MemoryRelay>,
    sent: Mutex<Vec<OutboundSignal>>,
}

impl MemoryChannel {
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn sent(&self) -> Vec<OutboundSignal> {
        self.sent.lock().clone()
    }
}

impl SignalingChannel for MemoryChannel {
    fn local_id(&self) -> Option<PeerId> {
        Some(self.id.clone())
    }

    fn emit(&self, signal: OutboundSignal) -> Result<(), SignalingError> {
        self.sent.lock().push(signal.clone());
        self.relay.route(&self.id, signal)
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.relay.bus.disconnect(self.id.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{IceCandidate, SessionDescription};

    fn join(channel: &MemoryChannel, role: Role) {
        channel
            .emit(OutboundSignal::JoinRoom {
                room_id: "demo-room".into(),
                role,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn viewer_join_notifies_sharer_only() {
        let relay = MemoryRelay::new();
        let (sharer, mut sharer_rx) = relay.connect_as("sharer");
        let (viewer_a, mut viewer_a_rx) = relay.connect_as("viewer-a");
        let (viewer_b, mut viewer_b_rx) = relay.connect_as("viewer-b");
        join(&sharer, Role::Sharer);
        join(&viewer_a, Role::Viewer);
        join(&viewer_b, Role::Viewer);

        assert_eq!(
            sharer_rx.recv().await,
            Some(InboundSignal::ViewerJoined(PeerId::from("viewer-a")))
        );
        assert_eq!(
            sharer_rx.recv().await,
            Some(InboundSignal::ViewerJoined(PeerId::from("viewer-b")))
        );
        assert!(viewer_a_rx.try_recv().is_err());
        assert!(viewer_b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn directed_events_are_stamped_with_sender() {
        let relay = MemoryRelay::new();
        let (sharer, mut sharer_rx) = relay.connect_as("sharer");
        let (viewer, mut viewer_rx) = relay.connect_as("viewer");
        join(&sharer, Role::Sharer);
        join(&viewer, Role::Viewer);
        let _ = sharer_rx.recv().await;

        sharer
            .emit(OutboundSignal::Offer {
                viewer_id: PeerId::from("viewer"),
                offer: SessionDescription::offer("v=0"),
            })
            .unwrap();
        assert_eq!(
            viewer_rx.recv().await,
            Some(InboundSignal::Offer {
                sharer_id: PeerId::from("sharer"),
                offer: SessionDescription::offer("v=0"),
            })
        );

        viewer
            .emit(OutboundSignal::IceCandidate {
                target: PeerId::from("sharer"),
                candidate: IceCandidate::new("candidate:1"),
            })
            .unwrap();
        assert_eq!(
            sharer_rx.recv().await,
            Some(InboundSignal::IceCandidate {
                from: PeerId::from("viewer"),
                candidate: IceCandidate::new("candidate:1"),
            })
        );
    }

    #[tokio::test]
    async fn events_for_absent_participants_are_dropped() {
        let relay = MemoryRelay::new();
        let (sharer, _sharer_rx) = relay.connect_as("sharer");
        join(&sharer, Role::Sharer);
        sharer
            .emit(OutboundSignal::Answer {
                sharer_id: PeerId::from("nobody"),
                answer: SessionDescription::answer("v=0"),
            })
            .unwrap();
        assert_eq!(sharer.sent().len(), 2);
    }

    #[test]
    fn generated_ids_are_unique() {
        let relay = MemoryRelay::new();
        let (a, _a_rx) = relay.connect();
        let (b, _b_rx) = relay.connect();
        assert_ne!(a.id(), b.id());
    }
}
