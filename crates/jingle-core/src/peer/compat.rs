//! Workarounds for remote implementations that bend the protocol

use crate::config::CompatConfig;
use crate::signaling::FeatureSet;

/// Decides per remote peer which interop workarounds apply
pub trait CompatibilityPolicy: Send + Sync {
    /// The peer may send session-accept before any of its candidates; such
    /// an accept is held back until transport-info arrives
    fn defers_accept_without_candidates(&self, features: Option<&FeatureSet>) -> bool;
}

/// Strict protocol, no workarounds
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictPolicy;

impl CompatibilityPolicy for StrictPolicy {
    fn defers_accept_without_candidates(&self, _features: Option<&FeatureSet>) -> bool {
        false
    }
}

/// Matches the discovery identity names of the remote peer
#[derive(Debug, Clone, Default)]
pub struct IdentityPolicy {
    accept_before_candidates: Vec<String>,
}

impl IdentityPolicy {
    pub fn new(config: &CompatConfig) -> Self {
        Self {
            accept_before_candidates: config.accept_before_candidates.clone(),
        }
    }
}

impl CompatibilityPolicy for IdentityPolicy {
    fn defers_accept_without_candidates(&self, features: Option<&FeatureSet>) -> bool {
        let Some(features) = features else {
            return false;
        };
        features.identity_names().any(|name| {
            self.accept_before_candidates
                .iter()
                .any(|known| name.to_ascii_lowercase().contains(&known.to_ascii_lowercase()))
        })
    }
}
