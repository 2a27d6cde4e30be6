use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("member {0} is not connected")]
    UnknownMember(String),
    #[error("member {0} has not joined a room")]
    NotInRoom(String),
    #[error("bus channel closed for {0}")]
    Closed(String),
}

pub type BusResult<T> = Result<T, BusError>;

struct Member<M> {
    room: Option<String>,
    tag: Option<String>,
    tx: mpsc::UnboundedSender<M>,
}

/// Room-scoped directed delivery between connected members.
///
/// A member connects once and receives everything addressed to it on the
/// returned receiver. Joining a room (optionally with a tag such as a role)
/// makes the member reachable through [`RoomBus::broadcast`]. Delivery never
/// crosses room boundaries.
pub struct RoomBus<M> {
    members: RwLock<HashMap<String, Member<M>>>,
}

impl<M> Default for RoomBus<M> {
    fn default() -> Self {
        Self {
            members: RwLock::new(HashMap::new()),
        }
    }
}

impl<M: Clone> RoomBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a member. Reconnecting under the same id replaces the old
    /// inbox, which then observes a closed channel.
    pub fn connect(&self, id: &str) -> mpsc::UnboundedReceiver<M> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.members.write().insert(
            id.to_string(),
            Member {
                room: None,
                tag: None,
                tx,
            },
        );
        rx
    }

    /// Forget a member. Later deliveries addressed to it fail with
    /// [`BusError::UnknownMember`].
    pub fn disconnect(&self, id: &str) {
        self.members.write().remove(id);
    }

    pub fn join(&self, id: &str, room: &str, tag: Option<&str>) -> BusResult<()> {
        let mut guard = self.members.write();
        let member = guard
            .get_mut(id)
            .ok_or_else(|| BusError::UnknownMember(id.to_string()))?;
        member.room = Some(room.to_string());
        member.tag = tag.map(str::to_string);
        Ok(())
    }

    /// Deliver `message` to `to`, provided both members share a room.
    pub fn send_to(&self, from: &str, to: &str, message: M) -> BusResult<()> {
        let guard = self.members.read();
        let sender_room = guard
            .get(from)
            .ok_or_else(|| BusError::UnknownMember(from.to_string()))?
            .room
            .clone()
            .ok_or_else(|| BusError::NotInRoom(from.to_string()))?;
        let target = guard
            .get(to)
            .ok_or_else(|| BusError::UnknownMember(to.to_string()))?;
        if target.room.as_deref() != Some(sender_room.as_str()) {
            return Err(BusError::NotInRoom(to.to_string()));
        }
        target
            .tx
            .send(message)
            .map_err(|_| BusError::Closed(to.to_string()))
    }

    /// Deliver `message` to every other member of the sender's room whose tag
    /// equals `tag` (or to all of them when `tag` is `None`). Returns the
    /// number of members reached.
    pub fn broadcast(&self, from: &str, tag: Option<&str>, message: M) -> BusResult<usize> {
        let guard = self.members.read();
        let room = guard
            .get(from)
            .ok_or_else(|| BusError::UnknownMember(from.to_string()))?
            .room
            .clone()
            .ok_or_else(|| BusError::NotInRoom(from.to_string()))?;
        let mut delivered = 0;
        for (id, member) in guard.iter() {
            if id == from || member.room.as_deref() != Some(room.as_str()) {
                continue;
            }
            if tag.is_some() && member.tag.as_deref() != tag {
                continue;
            }
            if member.tx.send(message.clone()).is_ok() {
                delivered += 1;
            }
        }
        Ok(delivered)
    }
}
