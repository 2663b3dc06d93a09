//! Jingle message model (XEP-0166/0167) and the direction calculus

mod content;
mod message;
mod types;

pub use content::{Content, EncryptionHints, PayloadType, RtpDescription};
pub use message::{JingleAction, JingleMessage, Reason, SessionInfo, Stanza, TerminateReason, Transfer};
pub use types::{Creator, Direction, Jid, MediaType, PeerId, Senders, SessionId};
