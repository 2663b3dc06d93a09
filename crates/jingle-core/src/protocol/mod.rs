//! Signaling dialects a session can be carried in.
//!
//! The peer state machine always reasons in terms of [`JingleMessage`]s.
//! A [`SessionProtocol`] turns each outbound message into the stanzas of its
//! dialect and tells the state machine which optional features the dialect
//! has. Inbound legacy Google Talk sessions are converted to Jingle messages
//! before they reach a peer, see [`gtalk`].

pub mod gtalk;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::jingle::{Jid, JingleAction, JingleMessage, Stanza};
use crate::signaling::{FeatureSet, FEATURE_GTALK_VOICE, FEATURE_JINGLE};

pub use gtalk::{GTalkAction, GTalkCandidate, GTalkDescription, GTalkProtocol, GTalkSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVariant {
    /// XEP-0166/0167
    Jingle,
    /// Legacy Google Talk session protocol
    GTalk,
}

impl ProtocolVariant {
    /// Jingle whenever the remote side speaks it, Google Talk only for
    /// clients that announce nothing else
    pub fn for_features(features: &FeatureSet) -> Self {
        if !features.supports(FEATURE_JINGLE) && features.supports(FEATURE_GTALK_VOICE) {
            Self::GTalk
        } else {
            Self::Jingle
        }
    }
}

impl fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jingle => f.write_str("jingle"),
            Self::GTalk => f.write_str("gtalk"),
        }
    }
}

/// Message construction and feature set of one signaling dialect.
///
/// Every `build_*` method returns the stanzas to send for `message`, in
/// order; an empty list means the dialect has no equivalent and nothing is
/// sent. The defaults produce plain Jingle.
pub trait SessionProtocol: Send + Sync {
    fn variant(&self) -> ProtocolVariant;

    /// content-add, content-modify and content-remove can be sent
    fn supports_content_changes(&self) -> bool {
        true
    }

    /// Ringing, hold and transfer notifications can be sent
    fn supports_session_info(&self) -> bool {
        true
    }

    /// Every message names the session initiator, not only the initiate
    fn initiator_on_every_message(&self) -> bool {
        false
    }

    fn build_initiate(&self, _to: &Jid, message: JingleMessage) -> Vec<Stanza> {
        vec![Stanza::Jingle(message)]
    }

    fn build_accept(&self, _to: &Jid, message: JingleMessage) -> Vec<Stanza> {
        vec![Stanza::Jingle(message)]
    }

    fn build_terminate(&self, _to: &Jid, message: JingleMessage) -> Vec<Stanza> {
        vec![Stanza::Jingle(message)]
    }

    /// Trickled local candidates
    fn build_candidates(&self, _to: &Jid, message: JingleMessage) -> Vec<Stanza> {
        vec![Stanza::Jingle(message)]
    }

    /// session-info and content negotiation
    fn build_other(&self, _to: &Jid, message: JingleMessage) -> Vec<Stanza> {
        vec![Stanza::Jingle(message)]
    }

    fn encode(&self, to: &Jid, message: JingleMessage) -> Vec<Stanza> {
        let action = message.action;
        let stanzas = match action {
            JingleAction::SessionInitiate => self.build_initiate(to, message),
            JingleAction::SessionAccept => self.build_accept(to, message),
            JingleAction::SessionTerminate => self.build_terminate(to, message),
            JingleAction::TransportInfo => self.build_candidates(to, message),
            _ => self.build_other(to, message),
        };
        if stanzas.is_empty() {
            debug!("{} has no {} equivalent, not sent to {}", action, self.variant(), to);
        }
        stanzas
    }
}

/// XEP-0166 Jingle
#[derive(Debug, Clone, Copy, Default)]
pub struct JingleProtocol;

impl SessionProtocol for JingleProtocol {
    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::Jingle
    }
}

/// Protocol object for `variant`
pub fn protocol_for(variant: ProtocolVariant) -> Arc<dyn SessionProtocol> {
    match variant {
        ProtocolVariant::Jingle => Arc::new(JingleProtocol),
        ProtocolVariant::GTalk => Arc::new(GTalkProtocol),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jingle::{SessionId, TerminateReason};
    use crate::signaling::FEATURE_JINGLE_RTP;

    #[test]
    fn jingle_is_preferred_when_both_are_announced() {
        let both = FeatureSet::new([FEATURE_JINGLE, FEATURE_JINGLE_RTP, FEATURE_GTALK_VOICE]);
        assert_eq!(ProtocolVariant::for_features(&both), ProtocolVariant::Jingle);

        let legacy = FeatureSet::new([FEATURE_GTALK_VOICE]);
        assert_eq!(ProtocolVariant::for_features(&legacy), ProtocolVariant::GTalk);

        assert_eq!(ProtocolVariant::for_features(&FeatureSet::default()), ProtocolVariant::Jingle);
    }

    #[test]
    fn jingle_sends_every_message_as_is() {
        let to = Jid::new("romeo@montague.lit/orchard");
        let terminate = JingleMessage::terminate(SessionId::from("s1"), TerminateReason::Success, None);

        let stanzas = JingleProtocol.encode(&to, terminate.clone());
        assert_eq!(stanzas, vec![Stanza::Jingle(terminate)]);
        assert!(JingleProtocol.supports_content_changes());
    }
}
