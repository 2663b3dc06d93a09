//! Jingle call-session negotiation engine.
//!
//! The engine sits between an XMPP connection ([`SignalingTransport`]) and a
//! media engine ([`MediaEngine`]). For every session it negotiates contents,
//! drives candidate harvesting and connectivity through
//! `rvoip-jingle-transport`, and starts, redirects and stops streams. Calls
//! with several peers can act as a conference focus and keep their members
//! informed with throttled conference-info notifications.
//!
//! ```no_run
//! use std::sync::Arc;
//! use rvoip_jingle_core::prelude::*;
//!
//! # async fn run(signaling: Arc<dyn SignalingTransport>, media: Arc<dyn MediaEngine>) -> Result<()> {
//! let manager = CallManager::new(JingleConfig::default(), signaling, media)?;
//! let mut events = manager.subscribe();
//!
//! let peer = manager.call(Jid::new("romeo@montague.lit/orchard")).await?;
//! while let Ok(event) = events.recv().await {
//!     if let PeerEvent::StateChanged { new_state: PeerState::Connected, .. } = event {
//!         peer.put_on_hold(true).await?;
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

// Error handling
pub mod error;

// Jingle message model
pub mod jingle;

// Configuration and logging
pub mod config;
pub mod logging;

// External collaborators
pub mod signaling;
pub mod media;

// Sessions, calls and conferences
pub mod protocol;
pub mod peer;
pub mod call;
pub mod conference;
pub mod events;
pub mod manager;

mod context;

// Public exports
pub use call::{Call, CallId};
pub use config::{CoinConfig, CompatConfig, JingleConfig, MediaConfig};
pub use error::{JingleError, Result};
pub use events::PeerEvent;
pub use logging::{setup_logging, LoggingConfig};
pub use manager::CallManager;
pub use media::{FocusContext, HarvesterFactory, MediaDevice, MediaEngine, MediaNegotiator, StreamId, StreamParams};
pub use peer::{CallPeer, CompatibilityPolicy, PeerSnapshot, PeerState};
pub use protocol::{ProtocolVariant, SessionProtocol};
pub use signaling::{CapabilityCache, FeatureSet, SignalingTransport};

/// Re-export of common types
pub mod prelude {
    pub use crate::call::{Call, CallId};
    pub use crate::conference::{ConferenceInfo, DocumentState};
    pub use crate::config::JingleConfig;
    pub use crate::error::{JingleError, Result};
    pub use crate::events::PeerEvent;
    pub use crate::jingle::{
        Content, Direction, Jid, JingleAction, JingleMessage, MediaType, PayloadType, Senders, SessionId, Stanza,
        TerminateReason,
    };
    pub use crate::manager::CallManager;
    pub use crate::media::{MediaDevice, MediaEngine, StreamId, StreamParams};
    pub use crate::peer::{CallPeer, PeerState};
    pub use crate::signaling::{FeatureSet, SignalingTransport};
}
