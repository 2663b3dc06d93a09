//! Identifiers and the direction/senders calculus

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JingleError;

/// Jingle session id, assigned once per session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Local handle of a call peer, valid before a session id exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(pub Uuid);

impl PeerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// XMPP address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Jid(String);

impl Jid {
    pub fn new(jid: impl Into<String>) -> Self {
        Self(jid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Address without the resource part
    pub fn bare(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }

    pub fn resource(&self) -> Option<&str> {
        self.0.split_once('/').map(|(_, resource)| resource)
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Jid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Media carried by a content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Audio,
    Video,
}

impl MediaType {
    /// Offer order
    pub const ALL: [MediaType; 2] = [MediaType::Audio, MediaType::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = JingleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            other => Err(JingleError::protocol(format!("unknown media type: {}", other))),
        }
    }
}

/// Stream direction from the local point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl Direction {
    pub fn new(send: bool, recv: bool) -> Self {
        match (send, recv) {
            (true, true) => Self::SendRecv,
            (true, false) => Self::SendOnly,
            (false, true) => Self::RecvOnly,
            (false, false) => Self::Inactive,
        }
    }

    pub fn allows_sending(self) -> bool {
        matches!(self, Self::SendRecv | Self::SendOnly)
    }

    pub fn allows_receiving(self) -> bool {
        matches!(self, Self::SendRecv | Self::RecvOnly)
    }

    pub fn and(self, other: Direction) -> Direction {
        Self::new(
            self.allows_sending() && other.allows_sending(),
            self.allows_receiving() && other.allows_receiving(),
        )
    }

    pub fn or(self, other: Direction) -> Direction {
        Self::new(
            self.allows_sending() || other.allows_sending(),
            self.allows_receiving() || other.allows_receiving(),
        )
    }

    /// The same stream seen from the other end
    pub fn reverse(self) -> Direction {
        Self::new(self.allows_receiving(), self.allows_sending())
    }

    /// Direction to answer with when the remote side offered `remote`
    pub fn direction_for_answer(self, remote: Direction) -> Direction {
        self.and(remote.reverse())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendRecv => "sendrecv",
            Self::SendOnly => "sendonly",
            Self::RecvOnly => "recvonly",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who may send on a content, relative to the session initiator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Senders {
    Both,
    Initiator,
    Responder,
    None,
}

impl Senders {
    /// Senders value announcing `direction` as seen by the initiator
    /// (`initiator_view`) or by the responder
    pub fn from_direction(direction: Direction, initiator_view: bool) -> Self {
        match direction {
            Direction::SendRecv => Self::Both,
            Direction::Inactive => Self::None,
            Direction::SendOnly if initiator_view => Self::Initiator,
            Direction::SendOnly => Self::Responder,
            Direction::RecvOnly if initiator_view => Self::Responder,
            Direction::RecvOnly => Self::Initiator,
        }
    }

    /// Direction of the stream as seen by the initiator (`initiator_view`)
    /// or by the responder
    pub fn to_direction(self, initiator_view: bool) -> Direction {
        match self {
            Self::Both => Direction::SendRecv,
            Self::None => Direction::Inactive,
            Self::Initiator if initiator_view => Direction::SendOnly,
            Self::Initiator => Direction::RecvOnly,
            Self::Responder if initiator_view => Direction::RecvOnly,
            Self::Responder => Direction::SendOnly,
        }
    }

    /// Like [`Senders::to_direction`]; an absent attribute means `both`
    pub fn direction_of(senders: Option<Senders>, initiator_view: bool) -> Direction {
        senders.unwrap_or(Senders::Both).to_direction(initiator_view)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Both => "both",
            Self::Initiator => "initiator",
            Self::Responder => "responder",
            Self::None => "none",
        }
    }
}

impl fmt::Display for Senders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Senders {
    type Err = JingleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "both" => Ok(Self::Both),
            "initiator" => Ok(Self::Initiator),
            "responder" => Ok(Self::Responder),
            "none" => Ok(Self::None),
            other => Err(JingleError::protocol(format!("invalid senders value: {}", other))),
        }
    }
}

/// Which side proposed a content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Creator {
    Initiator,
    Responder,
}

impl Creator {
    /// The role of the local side
    pub fn local(local_is_initiator: bool) -> Self {
        if local_is_initiator {
            Self::Initiator
        } else {
            Self::Responder
        }
    }
}
