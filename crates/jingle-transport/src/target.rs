//! Local and remote socket pairs handed to the media engine

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::candidate::TransportDescription;
use crate::constants::{COMPONENT_RTCP, COMPONENT_RTP};

/// Remote RTP/RTCP addresses a stream sends to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamTarget {
    pub rtp: SocketAddr,
    pub rtcp: SocketAddr,
}

impl StreamTarget {
    pub fn new(rtp: SocketAddr, rtcp: SocketAddr) -> Self {
        Self { rtp, rtcp }
    }

    /// A zero data port means the remote side disabled the stream
    pub fn is_null(&self) -> bool {
        self.rtp.port() == 0
    }
}

/// Local RTP/RTCP addresses a stream is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConnector {
    pub rtp: SocketAddr,
    pub rtcp: SocketAddr,
}

/// Default target of a remote transport: the first RTP candidate, and the
/// first RTCP candidate or, lacking one, the RTP port plus one.
pub fn extract_default_target(transport: &TransportDescription) -> Option<StreamTarget> {
    let rtp = transport.first_candidate(COMPONENT_RTP)?.address;
    let rtcp = transport
        .first_candidate(COMPONENT_RTCP)
        .map(|c| c.address)
        .unwrap_or_else(|| SocketAddr::new(rtp.ip(), rtp.port().wrapping_add(1)));
    Some(StreamTarget { rtp, rtcp })
}
