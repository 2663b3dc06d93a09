//! Error types for Jingle session negotiation

use rvoip_jingle_transport::TransportError;
use thiserror::Error;

use crate::jingle::TerminateReason;

/// Result type for Jingle operations
pub type Result<T> = std::result::Result<T, JingleError>;

/// Errors raised while negotiating or running a Jingle session
#[derive(Error, Debug)]
pub enum JingleError {
    /// Operation not allowed in the current peer state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// No local device yields a usable direction
    #[error("No active media device")]
    NoActiveDevice,

    /// The remote peer supports none of our transports
    #[error("Peer {peer} supports neither ice-udp nor raw-udp")]
    UnsupportedTransport { peer: String },

    /// Remote description cannot be reconciled with ours
    #[error("Incompatible parameters: {message}")]
    IncompatibleParameters { message: String },

    /// Malformed or unexpected message from the remote peer
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Media engine failure
    #[error("Media error: {message}")]
    Media { message: String },

    /// Sending or discovery failure in the signaling layer
    #[error("Signaling error: {message}")]
    Signaling { message: String },

    /// Harvesting or connectivity failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Session not found: {sid}")]
    SessionNotFound { sid: String },

    /// The session was hung up while the operation was in flight
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl JingleError {
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState { message: message.into() }
    }

    pub fn incompatible(message: impl Into<String>) -> Self {
        Self::IncompatibleParameters { message: message.into() }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol { message: message.into() }
    }

    pub fn media(err: impl std::fmt::Display) -> Self {
        Self::Media { message: err.to_string() }
    }

    pub fn signaling(err: impl std::fmt::Display) -> Self {
        Self::Signaling { message: err.to_string() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Text carried in the terminate message and the state-change event
    pub fn reason_text(&self) -> String {
        match self {
            Self::Transport(TransportError::ConnectivityFailed { .. }) => {
                "could not establish connection".to_string()
            }
            other => format!("Error: {}", other),
        }
    }

    /// Terminate reason used when this error ends a session
    pub fn terminate_reason(&self) -> TerminateReason {
        match self {
            Self::IncompatibleParameters { .. } | Self::NoActiveDevice => TerminateReason::IncompatibleParameters,
            Self::UnsupportedTransport { .. } => TerminateReason::UnsupportedTransports,
            Self::Transport(TransportError::ConnectivityFailed { .. }) => TerminateReason::ConnectivityError,
            Self::Transport(_) => TerminateReason::FailedTransport,
            Self::Cancelled => TerminateReason::Cancel,
            _ => TerminateReason::GeneralError,
        }
    }
}

impl From<anyhow::Error> for JingleError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal { message: format!("{:#}", err) }
    }
}
