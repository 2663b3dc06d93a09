//! Contents: one named media stream description inside a session

use std::collections::BTreeMap;

use rvoip_jingle_transport::TransportDescription;
use serde::{Deserialize, Serialize};

use super::types::{Creator, MediaType, Senders};

/// One codec entry of an RTP description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadType {
    pub id: u8,
    pub name: String,
    pub clock_rate: u32,
    pub channels: u8,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl PayloadType {
    pub fn new(id: u8, name: impl Into<String>, clock_rate: u32) -> Self {
        Self {
            id,
            name: name.into(),
            clock_rate,
            channels: 1,
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_channels(mut self, channels: u8) -> Self {
        self.channels = channels;
        self
    }

    /// Same codec regardless of payload type number
    pub fn same_format(&self, other: &PayloadType) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
            && self.clock_rate == other.clock_rate
            && self.channels == other.channels
    }
}

/// SRTP hints attached to a description
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionHints {
    /// The sender refuses unencrypted media
    pub required: bool,
    pub crypto_suites: Vec<String>,
}

impl EncryptionHints {
    /// Suites of `self` that also appear in `supported`
    pub fn common_suites(&self, supported: &[String]) -> Vec<String> {
        self.crypto_suites
            .iter()
            .filter(|suite| supported.contains(suite))
            .cloned()
            .collect()
    }
}

/// RTP application description (XEP-0167)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtpDescription {
    pub media: MediaType,
    pub payload_types: Vec<PayloadType>,
    pub ssrc: Option<u32>,
    pub encryption: Option<EncryptionHints>,
}

impl RtpDescription {
    pub fn new(media: MediaType, payload_types: Vec<PayloadType>) -> Self {
        Self {
            media,
            payload_types,
            ssrc: None,
            encryption: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub name: String,
    pub creator: Creator,
    /// Absent means `both`
    pub senders: Option<Senders>,
    pub description: Option<RtpDescription>,
    pub transport: Option<TransportDescription>,
}

impl Content {
    pub fn new(name: impl Into<String>, creator: Creator) -> Self {
        Self {
            name: name.into(),
            creator,
            senders: None,
            description: None,
            transport: None,
        }
    }

    pub fn with_senders(mut self, senders: Senders) -> Self {
        self.senders = Some(senders);
        self
    }

    pub fn with_description(mut self, description: RtpDescription) -> Self {
        self.description = Some(description);
        self
    }

    pub fn with_transport(mut self, transport: TransportDescription) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Media of the description, or of the content name when there is none
    pub fn media_type(&self) -> Option<MediaType> {
        self.description
            .as_ref()
            .map(|d| d.media)
            .or_else(|| self.name.parse().ok())
    }

    pub fn has_candidates(&self) -> bool {
        self.transport.as_ref().is_some_and(|t| t.has_candidates())
    }

    /// Name, creator and senders only, as used by content-modify/remove
    pub fn header(&self) -> Content {
        Content {
            name: self.name.clone(),
            creator: self.creator,
            senders: self.senders,
            description: None,
            transport: None,
        }
    }
}
