//! Jingle actions and the structured messages exchanged with the signaling layer

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::content::Content;
use super::types::{Jid, SessionId};
use crate::conference::ConferenceInfo;
use crate::error::JingleError;
use crate::protocol::GTalkSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JingleAction {
    SessionInitiate,
    SessionAccept,
    SessionTerminate,
    SessionInfo,
    ContentAdd,
    ContentAccept,
    ContentModify,
    ContentReject,
    ContentRemove,
    TransportInfo,
}

impl JingleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionInitiate => "session-initiate",
            Self::SessionAccept => "session-accept",
            Self::SessionTerminate => "session-terminate",
            Self::SessionInfo => "session-info",
            Self::ContentAdd => "content-add",
            Self::ContentAccept => "content-accept",
            Self::ContentModify => "content-modify",
            Self::ContentReject => "content-reject",
            Self::ContentRemove => "content-remove",
            Self::TransportInfo => "transport-info",
        }
    }
}

impl fmt::Display for JingleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JingleAction {
    type Err = JingleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "session-initiate" => Self::SessionInitiate,
            "session-accept" => Self::SessionAccept,
            "session-terminate" => Self::SessionTerminate,
            "session-info" => Self::SessionInfo,
            "content-add" => Self::ContentAdd,
            "content-accept" => Self::ContentAccept,
            "content-modify" => Self::ContentModify,
            "content-reject" => Self::ContentReject,
            "content-remove" => Self::ContentRemove,
            "transport-info" => Self::TransportInfo,
            other => return Err(JingleError::protocol(format!("unknown jingle action: {}", other))),
        })
    }
}

/// Condition of a `<reason/>` element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerminateReason {
    Success,
    Busy,
    Cancel,
    Decline,
    GeneralError,
    FailedApplication,
    FailedTransport,
    IncompatibleParameters,
    ConnectivityError,
    UnsupportedTransports,
    Timeout,
}

impl TerminateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Busy => "busy",
            Self::Cancel => "cancel",
            Self::Decline => "decline",
            Self::GeneralError => "general-error",
            Self::FailedApplication => "failed-application",
            Self::FailedTransport => "failed-transport",
            Self::IncompatibleParameters => "incompatible-parameters",
            Self::ConnectivityError => "connectivity-error",
            Self::UnsupportedTransports => "unsupported-transports",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for TerminateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    pub condition: TerminateReason,
    pub text: Option<String>,
}

/// Transfer request carried in a session-info (XEP-0251)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Address of the party asking for the transfer
    pub from: Option<Jid>,
    pub to: Option<Jid>,
    /// Session to replace in an attended transfer
    pub sid: Option<String>,
}

/// Payload of a session-info message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionInfo {
    Ringing,
    Hold,
    Unhold,
    Active,
    Transfer(Transfer),
    /// Whether the sender acts as a conference focus
    ConferenceFocus(bool),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JingleMessage {
    pub action: JingleAction,
    pub sid: SessionId,
    pub initiator: Option<Jid>,
    pub responder: Option<Jid>,
    pub contents: Vec<Content>,
    pub reason: Option<Reason>,
    pub info: Option<SessionInfo>,
    /// `<conference-info isfocus>` flag of a session-initiate
    pub conference_focus: Option<bool>,
    /// Session this initiate replaces after an attended transfer
    pub transfer: Option<Transfer>,
}

impl JingleMessage {
    pub fn new(action: JingleAction, sid: SessionId) -> Self {
        Self {
            action,
            sid,
            initiator: None,
            responder: None,
            contents: Vec::new(),
            reason: None,
            info: None,
            conference_focus: None,
            transfer: None,
        }
    }

    pub fn with_contents(mut self, contents: Vec<Content>) -> Self {
        self.contents = contents;
        self
    }

    pub fn with_reason(mut self, condition: TerminateReason, text: Option<String>) -> Self {
        self.reason = Some(Reason { condition, text });
        self
    }

    pub fn with_info(mut self, info: SessionInfo) -> Self {
        self.info = Some(info);
        self
    }

    pub fn with_initiator(mut self, initiator: Jid) -> Self {
        self.initiator = Some(initiator);
        self
    }

    pub fn with_responder(mut self, responder: Jid) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn with_conference_focus(mut self, is_focus: bool) -> Self {
        self.conference_focus = Some(is_focus);
        self
    }

    pub fn with_transfer(mut self, transfer: Transfer) -> Self {
        self.transfer = Some(transfer);
        self
    }

    pub fn terminate(sid: SessionId, condition: TerminateReason, text: Option<String>) -> Self {
        Self::new(JingleAction::SessionTerminate, sid).with_reason(condition, text)
    }

    pub fn session_info(sid: SessionId, info: SessionInfo) -> Self {
        Self::new(JingleAction::SessionInfo, sid).with_info(info)
    }

    pub fn content(&self, name: &str) -> Option<&Content> {
        self.contents.iter().find(|c| c.name == name)
    }
}

/// Anything the engine hands to the signaling transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stanza {
    Jingle(JingleMessage),
    /// Session message of a legacy Google Talk peer
    GTalk(GTalkSession),
    ConferenceInfo(ConferenceInfo),
}

impl Stanza {
    pub fn as_jingle(&self) -> Option<&JingleMessage> {
        match self {
            Self::Jingle(message) => Some(message),
            _ => None,
        }
    }

    pub fn as_gtalk(&self) -> Option<&GTalkSession> {
        match self {
            Self::GTalk(session) => Some(session),
            _ => None,
        }
    }
}
