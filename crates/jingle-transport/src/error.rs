//! Error types for candidate harvesting and connectivity establishment

use thiserror::Error;

/// Errors raised by transport harvesters and connectivity agents
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket level failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid harvester configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Operation not valid in the current state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// `wrapup()` was called before any harvest was started
    #[error("Candidate harvest has not been started")]
    HarvestNotStarted,

    /// Gathering local candidates failed
    #[error("Candidate harvest failed: {message}")]
    HarvestFailed { message: String },

    /// Connectivity checks concluded without a usable pair
    #[error("Could not establish connection: {message}")]
    ConnectivityFailed { message: String },

    /// A bounded wait expired
    #[error("Timed out after {millis}ms waiting for {operation}")]
    Timeout { operation: String, millis: u64 },

    /// The harvester or agent has been closed
    #[error("Transport closed")]
    Closed,

    /// Candidate could not be parsed or is inconsistent
    #[error("Invalid candidate: {message}")]
    InvalidCandidate { message: String },

    /// No stream exists for the named content
    #[error("Unknown content: {name}")]
    UnknownContent { name: String },
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState { message: message.into() }
    }

    pub fn harvest_failed(message: impl Into<String>) -> Self {
        Self::HarvestFailed { message: message.into() }
    }

    pub fn connectivity_failed(message: impl Into<String>) -> Self {
        Self::ConnectivityFailed { message: message.into() }
    }

    pub fn invalid_candidate(message: impl Into<String>) -> Self {
        Self::InvalidCandidate { message: message.into() }
    }

    pub fn timeout(operation: impl Into<String>, duration: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            millis: duration.as_millis() as u64,
        }
    }

    /// True when the failure means the session cannot carry media
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConnectivityFailed { .. } | Self::HarvestFailed { .. } | Self::Timeout { .. }
        )
    }
}
