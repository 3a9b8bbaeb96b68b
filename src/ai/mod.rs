pub mod client;
pub mod protocol;
pub mod reconnect;

pub use client::{AiEvent, AiReceiver, AiSender};
pub use protocol::{InboundMessage, OutboundMessage};
pub use reconnect::{ReconnectReason, ReconnectSupervisor, ReplayRing};
