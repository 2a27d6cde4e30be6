use crate::transport::{SessionDescription, SignalingState};

/// Where the remote answer for one negotiation stands.
///
/// The slot is only ever driven through [`AnswerSlot::on_answer`],
/// [`AnswerSlot::on_local_state`] and [`AnswerSlot::finish`], each of which
/// returns the single action the caller must carry out. At most one answer is
/// buffered, and once an application succeeds every later answer is refused.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AnswerSlot {
    #[default]
    Empty,
    Pending(SessionDescription),
    Applying,
    Applied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotAction {
    /// Commit this answer to the transport now.
    Apply(SessionDescription),
    /// The answer arrived early and is now buffered.
    Buffer,
    /// An answer is already applied or being applied.
    Discard,
    Nothing,
}

impl AnswerSlot {
    /// A remote answer arrived while the transport reports `local`.
    pub fn on_answer(&mut self, answer: SessionDescription, local: SignalingState) -> SlotAction {
        match std::mem::take(self) {
            current @ (AnswerSlot::Applying | AnswerSlot::Applied) => {
                *self = current;
                SlotAction::Discard
            }
            // A newer answer supersedes anything still buffered.
            AnswerSlot::Empty | AnswerSlot::Pending(_) => {
                if local == SignalingState::HaveLocalOffer {
                    *self = AnswerSlot::Applying;
                    SlotAction::Apply(answer)
                } else {
                    *self = AnswerSlot::Pending(answer);
                    SlotAction::Buffer
                }
            }
        }
    }

    /// The transport reports `local`. Releases a buffered answer once the
    /// local offer is committed.
    pub fn on_local_state(&mut self, local: SignalingState) -> SlotAction {
        match std::mem::take(self) {
            AnswerSlot::Pending(answer) if local == SignalingState::HaveLocalOffer => {
                *self = AnswerSlot::Applying;
                SlotAction::Apply(answer)
            }
            current => {
                *self = current;
                SlotAction::Nothing
            }
        }
    }

    /// An application started by `Apply` completed. A failed answer is
    /// dropped and the slot reopens.
    pub fn finish(&mut self, applied: bool) {
        if *self == AnswerSlot::Applying {
            *self = if applied {
                AnswerSlot::Applied
            } else {
                AnswerSlot::Empty
            };
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, AnswerSlot::Pending(_))
    }

    pub fn is_applied(&self) -> bool {
        *self == AnswerSlot::Applied
    }
}
