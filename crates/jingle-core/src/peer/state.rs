use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of one call peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerState {
    Idle,
    /// Outgoing call, session-initiate not sent yet
    InitiatingCall,
    /// Incoming call waiting to be answered
    IncomingCall,
    Connecting,
    /// The remote side reported ringing
    AlertingRemoteSide,
    Connected,
    OnHold,
    Disconnected,
    Failed,
    Busy,
}

impl PeerState {
    /// No signaling is sent once one of these is reached
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Busy)
    }

    /// States in which content changes and hold are allowed
    pub fn is_established(&self) -> bool {
        matches!(self, Self::Connected | Self::OnHold)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::InitiatingCall => "initiating-call",
            Self::IncomingCall => "incoming-call",
            Self::Connecting => "connecting",
            Self::AlertingRemoteSide => "alerting-remote-side",
            Self::Connected => "connected",
            Self::OnHold => "on-hold",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Busy => "busy",
        }
    }
}

impl Default for PeerState {
    fn default() -> Self {
        Self::Idle
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
