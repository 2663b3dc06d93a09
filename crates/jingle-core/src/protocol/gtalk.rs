//! Legacy Google Talk sessions (`http://www.google.com/session`).
//!
//! A GTalk session carries one description with every codec, and sends its
//! candidates in separate `candidates` messages named after the stream
//! component (`rtp`, `rtcp`, `video_rtp`, `video_rtcp`). Connectivity uses
//! the ice-udp harvester. There is no hold, transfer or mid-call content
//! negotiation.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use rvoip_jingle_transport::constants::{COMPONENT_RTCP, COMPONENT_RTP};
use rvoip_jingle_transport::{CandidateType, TransportCandidate, TransportDescription, TransportKind, TransportProtocol};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ProtocolVariant, SessionProtocol};
use crate::error::{JingleError, Result};
use crate::jingle::{
    Content, Creator, Jid, JingleAction, JingleMessage, MediaType, PayloadType, Reason, RtpDescription, Senders,
    SessionId, Stanza, TerminateReason,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GTalkAction {
    Initiate,
    Accept,
    Reject,
    Terminate,
    Candidates,
}

impl GTalkAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiate => "initiate",
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::Terminate => "terminate",
            Self::Candidates => "candidates",
        }
    }
}

impl fmt::Display for GTalkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GTalkAction {
    type Err = JingleError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "initiate" => Self::Initiate,
            "accept" => Self::Accept,
            "reject" => Self::Reject,
            "terminate" => Self::Terminate,
            "candidates" => Self::Candidates,
            other => return Err(JingleError::protocol(format!("unknown gtalk session type: {}", other))),
        })
    }
}

/// `<candidate/>` of a GTalk session, attributes as on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GTalkCandidate {
    /// `rtp`, `rtcp`, `video_rtp` or `video_rtcp`
    pub name: String,
    pub address: SocketAddr,
    /// `udp`, `tcp` or `ssltcp`
    pub protocol: String,
    /// `local`, `stun` or `relay`
    pub candidate_type: String,
    /// Between 0.0 and 1.0
    pub preference: f32,
    pub generation: u32,
    pub network: u32,
    pub username: String,
    pub password: String,
}

/// Stream and component a candidate name stands for
fn component_of(name: &str) -> Option<(MediaType, u16)> {
    match name {
        "rtp" => Some((MediaType::Audio, COMPONENT_RTP)),
        "rtcp" => Some((MediaType::Audio, COMPONENT_RTCP)),
        "video_rtp" => Some((MediaType::Video, COMPONENT_RTP)),
        "video_rtcp" => Some((MediaType::Video, COMPONENT_RTCP)),
        _ => None,
    }
}

fn candidate_name(media: MediaType, component: u16) -> Option<&'static str> {
    match (media, component) {
        (MediaType::Audio, COMPONENT_RTP) => Some("rtp"),
        (MediaType::Audio, COMPONENT_RTCP) => Some("rtcp"),
        (MediaType::Video, COMPONENT_RTP) => Some("video_rtp"),
        (MediaType::Video, COMPONENT_RTCP) => Some("video_rtcp"),
        _ => None,
    }
}

impl GTalkCandidate {
    /// Wire form of one of our candidates for `media`
    pub fn from_transport(
        media: MediaType,
        transport: &TransportDescription,
        candidate: &TransportCandidate,
    ) -> Option<Self> {
        let name = candidate_name(media, candidate.component)?;
        let candidate_type = match candidate.candidate_type {
            CandidateType::Host => "local",
            CandidateType::Prflx | CandidateType::Srflx => "stun",
            CandidateType::Relay => "relay",
        };
        let preference =
            candidate.candidate_type.type_preference() as f32 / CandidateType::Host.type_preference() as f32;

        Some(Self {
            name: name.to_string(),
            address: candidate.address,
            protocol: candidate.protocol.as_str().to_string(),
            candidate_type: candidate_type.to_string(),
            preference,
            generation: candidate.generation,
            network: candidate.network,
            username: transport.ufrag.clone().unwrap_or_default(),
            password: transport.pwd.clone().unwrap_or_default(),
        })
    }

    /// Transport candidate of `component`; `ssltcp` is treated as tcp
    pub fn to_transport(&self, component: u16) -> Result<TransportCandidate> {
        let protocol = if self.protocol.eq_ignore_ascii_case("ssltcp") {
            TransportProtocol::Tcp
        } else {
            TransportProtocol::from_str(&self.protocol)?
        };
        let candidate_type = CandidateType::from_str(&self.candidate_type)?;

        Ok(TransportCandidate {
            id: format!("{}-{}", self.name, self.address),
            foundation: "0".to_string(),
            component,
            protocol,
            priority: (self.preference.clamp(0.0, 1.0) * 1000.0) as u32,
            address: self.address,
            candidate_type,
            generation: self.generation,
            network: self.network,
            related_address: None,
        })
    }
}

/// The single description of a GTalk session; video payload types travel
/// next to the audio ones
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GTalkDescription {
    pub audio: Vec<PayloadType>,
    pub video: Vec<PayloadType>,
}

impl GTalkDescription {
    fn formats(&self, media: MediaType) -> &[PayloadType] {
        match media {
            MediaType::Audio => &self.audio,
            MediaType::Video => &self.video,
        }
    }

    fn from_contents(contents: &[Content]) -> Option<Self> {
        let mut description = Self::default();
        for content in contents {
            let Some(rtp) = &content.description else {
                continue;
            };
            match rtp.media {
                MediaType::Audio => description.audio.extend(rtp.payload_types.iter().cloned()),
                MediaType::Video => description.video.extend(rtp.payload_types.iter().cloned()),
            }
        }
        (!description.audio.is_empty() || !description.video.is_empty()).then_some(description)
    }
}

/// `<session/>` IQ payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GTalkSession {
    pub action: GTalkAction,
    pub sid: SessionId,
    pub initiator: Option<Jid>,
    pub description: Option<GTalkDescription>,
    pub candidates: Vec<GTalkCandidate>,
    pub reason: Option<Reason>,
}

impl GTalkSession {
    pub fn new(action: GTalkAction, sid: SessionId) -> Self {
        Self {
            action,
            sid,
            initiator: None,
            description: None,
            candidates: Vec::new(),
            reason: None,
        }
    }

    pub fn with_initiator(mut self, initiator: Jid) -> Self {
        self.initiator = Some(initiator);
        self
    }

    pub fn with_description(mut self, description: GTalkDescription) -> Self {
        self.description = Some(description);
        self
    }

    pub fn with_candidates(mut self, candidates: Vec<GTalkCandidate>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_reason(mut self, condition: TerminateReason, text: Option<String>) -> Self {
        self.reason = Some(Reason { condition, text });
        self
    }

    /// Remote candidates grouped into one ice-udp transport per stream
    fn transports(&self) -> Result<BTreeMap<MediaType, TransportDescription>> {
        let mut transports: BTreeMap<MediaType, TransportDescription> = BTreeMap::new();
        for candidate in &self.candidates {
            let Some((media, component)) = component_of(&candidate.name) else {
                debug!("Ignoring gtalk candidate with unknown name {}", candidate.name);
                continue;
            };
            let transport = transports
                .entry(media)
                .or_insert_with(|| TransportDescription::new(media.as_str(), TransportKind::IceUdp));
            if transport.ufrag.is_none() && !candidate.username.is_empty() {
                transport.ufrag = Some(candidate.username.clone());
                transport.pwd = Some(candidate.password.clone());
            }
            transport.candidates.push(candidate.to_transport(component)?);
        }
        Ok(transports)
    }

    /// One content per media of the description. With `always_transport`
    /// every content gets an ice-udp transport, empty if no candidate came
    /// along.
    fn described_contents(&self, always_transport: bool) -> Result<Vec<Content>> {
        let mut transports = self.transports()?;
        let Some(description) = &self.description else {
            return Ok(Vec::new());
        };

        let mut contents = Vec::new();
        for media in MediaType::ALL {
            let formats = description.formats(media);
            if formats.is_empty() {
                continue;
            }
            let mut content = Content::new(media.as_str(), Creator::Initiator)
                .with_senders(Senders::Both)
                .with_description(RtpDescription::new(media, formats.to_vec()));
            content.transport = match transports.remove(&media) {
                Some(transport) => Some(transport),
                None if always_transport => Some(TransportDescription::new(media.as_str(), TransportKind::IceUdp)),
                None => None,
            };
            contents.push(content);
        }
        Ok(contents)
    }

    /// The Jingle message the peer state machine handles for this session
    /// message
    pub fn into_jingle(self) -> Result<JingleMessage> {
        let message = match self.action {
            GTalkAction::Initiate => {
                let initiator = self
                    .initiator
                    .clone()
                    .ok_or_else(|| JingleError::protocol("gtalk initiate without initiator"))?;
                JingleMessage::new(JingleAction::SessionInitiate, self.sid.clone())
                    .with_initiator(initiator)
                    .with_contents(self.described_contents(true)?)
            }
            GTalkAction::Accept => JingleMessage::new(JingleAction::SessionAccept, self.sid.clone())
                .with_contents(self.described_contents(false)?),
            GTalkAction::Reject | GTalkAction::Terminate => {
                let mut terminate = JingleMessage::new(JingleAction::SessionTerminate, self.sid.clone());
                terminate.reason = self.reason.clone();
                terminate
            }
            GTalkAction::Candidates => {
                let contents = self
                    .transports()?
                    .into_iter()
                    .map(|(media, transport)| Content::new(media.as_str(), Creator::Initiator).with_transport(transport))
                    .collect();
                JingleMessage::new(JingleAction::TransportInfo, self.sid.clone()).with_contents(contents)
            }
        };
        Ok(message)
    }
}

/// Legacy Google Talk dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct GTalkProtocol;

impl GTalkProtocol {
    /// Android clients and the Google Voice gateway fail on IPv6 candidates
    fn accepts_ipv6(to: &Jid) -> bool {
        let android = to.resource().is_some_and(|r| r.to_ascii_lowercase().starts_with("android"));
        let voice_gateway = to.bare().ends_with("@voice.google.com");
        !(android || voice_gateway)
    }

    fn candidates_for(to: &Jid, contents: &[Content]) -> Vec<GTalkCandidate> {
        let ipv6 = Self::accepts_ipv6(to);
        let mut candidates = Vec::new();
        for content in contents {
            let (Some(media), Some(transport)) = (content.media_type(), content.transport.as_ref()) else {
                continue;
            };
            candidates.extend(
                transport
                    .candidates
                    .iter()
                    .filter(|c| ipv6 || c.address.is_ipv4())
                    .filter_map(|c| GTalkCandidate::from_transport(media, transport, c)),
            );
        }
        candidates
    }

    fn session(action: GTalkAction, message: &JingleMessage) -> GTalkSession {
        let mut session = GTalkSession::new(action, message.sid.clone());
        session.initiator = message.initiator.clone();
        session
    }

    /// The session message followed by its candidates, if there are any
    fn with_candidates(to: &Jid, session: GTalkSession, message: &JingleMessage) -> Vec<Stanza> {
        let candidates = Self::candidates_for(to, &message.contents);
        let mut stanzas = vec![Stanza::GTalk(session)];
        if !candidates.is_empty() {
            stanzas.push(Stanza::GTalk(
                Self::session(GTalkAction::Candidates, message).with_candidates(candidates),
            ));
        }
        stanzas
    }
}

impl SessionProtocol for GTalkProtocol {
    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::GTalk
    }

    fn supports_content_changes(&self) -> bool {
        false
    }

    fn supports_session_info(&self) -> bool {
        false
    }

    fn initiator_on_every_message(&self) -> bool {
        true
    }

    fn build_initiate(&self, to: &Jid, message: JingleMessage) -> Vec<Stanza> {
        let mut session = Self::session(GTalkAction::Initiate, &message);
        session.description = GTalkDescription::from_contents(&message.contents);
        Self::with_candidates(to, session, &message)
    }

    fn build_accept(&self, to: &Jid, message: JingleMessage) -> Vec<Stanza> {
        let mut session = Self::session(GTalkAction::Accept, &message);
        session.description = GTalkDescription::from_contents(&message.contents);
        Self::with_candidates(to, session, &message)
    }

    /// Refusing an incoming call is a reject, everything else a terminate
    fn build_terminate(&self, _to: &Jid, message: JingleMessage) -> Vec<Stanza> {
        let refused = message
            .reason
            .as_ref()
            .is_some_and(|r| matches!(r.condition, TerminateReason::Busy | TerminateReason::Decline));
        let action = if refused { GTalkAction::Reject } else { GTalkAction::Terminate };
        let mut session = Self::session(action, &message);
        session.reason = message.reason;
        vec![Stanza::GTalk(session)]
    }

    fn build_candidates(&self, to: &Jid, message: JingleMessage) -> Vec<Stanza> {
        let candidates = Self::candidates_for(to, &message.contents);
        if candidates.is_empty() {
            return Vec::new();
        }
        vec![Stanza::GTalk(
            Self::session(GTalkAction::Candidates, &message).with_candidates(candidates),
        )]
    }

    fn build_other(&self, _to: &Jid, _message: JingleMessage) -> Vec<Stanza> {
        Vec::new()
    }
}
