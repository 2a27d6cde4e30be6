pub mod cli;
pub mod config;
pub mod media;
pub mod negotiation;
pub mod registry;
pub mod router;
pub mod session;
pub mod signaling;
pub mod telemetry;
pub mod transport;

pub use negotiation::{AnswerOutcome, CandidateOutcome, NegotiationEngine, NegotiationError};
pub use registry::PeerRegistry;
pub use router::{Dispatch, IgnoreReason, SignalingRouter};
pub use session::{SessionContext, SessionController, SessionError};
pub use signaling::{InboundSignal, OutboundSignal, PeerId, Role, SignalingChannel};
