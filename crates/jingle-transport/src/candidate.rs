//! Transport candidates and the per-content transport description exchanged
//! in Jingle `transport` elements.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::constants::{COMPONENT_RTCP, COMPONENT_RTP, NS_ICE_UDP, NS_RAW_UDP};
use crate::error::{Result, TransportError};

/// Candidate type, ordered host < peer-reflexive < server-reflexive < relayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateType {
    Host,
    Prflx,
    Srflx,
    Relay,
}

impl CandidateType {
    /// Type preference from RFC 8445 section 5.1.2.2
    pub fn type_preference(&self) -> u32 {
        match self {
            Self::Host => 126,
            Self::Prflx => 110,
            Self::Srflx => 100,
            Self::Relay => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Prflx => "prflx",
            Self::Srflx => "srflx",
            Self::Relay => "relay",
        }
    }
}

impl FromStr for CandidateType {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "host" | "local" => Ok(Self::Host),
            "prflx" => Ok(Self::Prflx),
            "srflx" | "stun" => Ok(Self::Srflx),
            "relay" | "relayed" => Ok(Self::Relay),
            other => Err(TransportError::invalid_candidate(format!("unknown candidate type '{}'", other))),
        }
    }
}

/// Transport protocol of a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    Udp,
    Tcp,
}

impl TransportProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
        }
    }
}

impl FromStr for TransportProtocol {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(Self::Udp),
            "tcp" => Ok(Self::Tcp),
            other => Err(TransportError::invalid_candidate(format!("unknown protocol '{}'", other))),
        }
    }
}

/// Which Jingle transport a description belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// `urn:xmpp:jingle:transports:raw-udp:1`
    RawUdp,
    /// `urn:xmpp:jingle:transports:ice-udp:1`
    IceUdp,
}

impl TransportKind {
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::RawUdp => NS_RAW_UDP,
            Self::IceUdp => NS_ICE_UDP,
        }
    }

    pub fn from_namespace(ns: &str) -> Option<Self> {
        match ns {
            NS_RAW_UDP => Some(Self::RawUdp),
            NS_ICE_UDP => Some(Self::IceUdp),
            _ => None,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

/// One network path endpoint offered by either side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportCandidate {
    /// Identifier unique within the harvester that produced it
    pub id: String,

    /// Foundation, shared by candidates with the same base and type
    pub foundation: String,

    /// Component id (1 = RTP, 2 = RTCP)
    pub component: u16,

    pub protocol: TransportProtocol,

    pub priority: u32,

    pub address: SocketAddr,

    pub candidate_type: CandidateType,

    /// Negotiation round the candidate belongs to
    pub generation: u32,

    /// Network interface index
    pub network: u32,

    /// Base address for reflexive and relayed candidates
    pub related_address: Option<SocketAddr>,
}

impl TransportCandidate {
    /// Create a host candidate with a computed priority
    pub fn host(id: impl Into<String>, component: u16, address: SocketAddr, generation: u32) -> Self {
        Self {
            id: id.into(),
            foundation: "1".to_string(),
            component,
            protocol: TransportProtocol::Udp,
            priority: Self::compute_priority(CandidateType::Host, 65535, component),
            address,
            candidate_type: CandidateType::Host,
            generation,
            network: 0,
            related_address: None,
        }
    }

    /// priority = 2^24 * type preference + 2^8 * local preference + (256 - component)
    pub fn compute_priority(candidate_type: CandidateType, local_preference: u16, component: u16) -> u32 {
        (candidate_type.type_preference() << 24)
            + ((local_preference as u32) << 8)
            + (256 - component.min(256) as u32)
    }

    pub fn is_rtp(&self) -> bool {
        self.component == COMPONENT_RTP
    }

    pub fn is_rtcp(&self) -> bool {
        self.component == COMPONENT_RTCP
    }

    /// Render as an SDP `candidate:` attribute value
    pub fn to_sdp_string(&self) -> String {
        let mut line = format!(
            "candidate:{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component,
            self.protocol.as_str().to_ascii_uppercase(),
            self.priority,
            self.address.ip(),
            self.address.port(),
            self.candidate_type.as_str()
        );
        if let Some(related) = self.related_address {
            line.push_str(&format!(" raddr {} rport {}", related.ip(), related.port()));
        }
        line.push_str(&format!(" generation {}", self.generation));
        line
    }
}

impl fmt::Display for TransportCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sdp_string())
    }
}

/// The transport part of one Jingle content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportDescription {
    /// Name of the content this transport belongs to
    pub content: String,

    pub kind: TransportKind,

    /// ICE username fragment (ice-udp only)
    pub ufrag: Option<String>,

    /// ICE password (ice-udp only)
    pub pwd: Option<String>,

    pub candidates: Vec<TransportCandidate>,
}

impl TransportDescription {
    pub fn new(content: impl Into<String>, kind: TransportKind) -> Self {
        Self {
            content: content.into(),
            kind,
            ufrag: None,
            pwd: None,
            candidates: Vec::new(),
        }
    }

    pub fn with_candidates(mut self, candidates: Vec<TransportCandidate>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_credentials(mut self, ufrag: impl Into<String>, pwd: impl Into<String>) -> Self {
        self.ufrag = Some(ufrag.into());
        self.pwd = Some(pwd.into());
        self
    }

    pub fn has_candidates(&self) -> bool {
        !self.candidates.is_empty()
    }

    /// First candidate for the given component, if any
    pub fn first_candidate(&self, component: u16) -> Option<&TransportCandidate> {
        self.candidates.iter().find(|c| c.component == component)
    }
}

/// Hands out candidate ids that are unique for one harvester instance
#[derive(Debug)]
pub struct CandidateIdGenerator {
    prefix: String,
    next: AtomicU64,
}

impl CandidateIdGenerator {
    pub fn new() -> Self {
        Self {
            prefix: format!("{:x}", rand::random::<u32>()),
            next: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}{}", self.prefix, n)
    }
}

impl Default for CandidateIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
