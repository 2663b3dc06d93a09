//! Notifications published to higher layers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conference::ConferenceInfo;
use crate::jingle::{Jid, PeerId, SessionId};
use crate::peer::PeerState;

/// Capacity of the event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PeerEvent {
    StateChanged {
        peer: PeerId,
        session_id: Option<SessionId>,
        remote: Jid,
        old_state: PeerState,
        new_state: PeerState,
        timestamp: DateTime<Utc>,
        reason: Option<String>,
    },

    /// A focus sent us an updated conference view
    ConferenceInfoReceived {
        peer: PeerId,
        info: ConferenceInfo,
    },

    /// The remote side asked us to call someone else
    TransferRequested {
        peer: PeerId,
        to: Jid,
        attended_sid: Option<String>,
    },
}

impl PeerEvent {
    pub fn peer(&self) -> PeerId {
        match self {
            Self::StateChanged { peer, .. }
            | Self::ConferenceInfoReceived { peer, .. }
            | Self::TransferRequested { peer, .. } => *peer,
        }
    }
}
