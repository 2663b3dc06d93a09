//! Candidate harvesting and connectivity establishment for Jingle sessions.
//!
//! Two transports are provided: raw-udp, which offers one host candidate per
//! component and uses the remote candidates as they arrive, and ice-udp,
//! which runs connectivity checks through a [`ConnectivityAgent`] before a
//! stream target is known.

// Error handling
pub mod error;

// Candidates and transport descriptions
pub mod candidate;

// Configuration
pub mod config;

// Connectivity agent
pub mod agent;

// Stream targets
pub mod target;

// Harvesters
pub mod harvester;

// Public exports
pub use agent::{ConnectivityAgent, ConnectivityState, IceAgent, IceRole};
pub use candidate::{
    CandidateIdGenerator, CandidateType, TransportCandidate, TransportDescription, TransportKind,
    TransportProtocol,
};
pub use config::{HarvesterConfig, HarvesterConfigBuilder};
pub use error::{Result, TransportError};
pub use harvester::{HarvestState, IceUdpHarvester, RawUdpHarvester, TransportHarvester};
pub use target::{extract_default_target, StreamConnector, StreamTarget};

/// Re-export of common types
pub mod prelude {
    pub use super::{
        ConnectivityAgent, ConnectivityState, HarvestState, HarvesterConfig, IceRole,
        IceUdpHarvester, RawUdpHarvester, Result, StreamConnector, StreamTarget,
        TransportCandidate, TransportDescription, TransportError, TransportHarvester,
        TransportKind,
    };
}

/// Transport constants
pub mod constants {
    /// RTP component id
    pub const COMPONENT_RTP: u16 = 1;

    /// RTCP component id
    pub const COMPONENT_RTCP: u16 = 2;

    /// XEP-0176 transport namespace
    pub const NS_ICE_UDP: &str = "urn:xmpp:jingle:transports:ice-udp:1";

    /// XEP-0177 transport namespace
    pub const NS_RAW_UDP: &str = "urn:xmpp:jingle:transports:raw-udp:1";

    /// Default bound for waiting on candidate harvesting
    pub const DEFAULT_HARVEST_TIMEOUT_MS: u64 = 10_000;

    /// Default bound for waiting on connectivity checks
    pub const DEFAULT_CONNECTIVITY_TIMEOUT_MS: u64 = 15_000;
}
