//! Collaborators shared by every call and peer of one engine

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::JingleConfig;
use crate::events::PeerEvent;
use crate::media::{HarvesterFactory, MediaEngine};
use crate::peer::CompatibilityPolicy;
use crate::signaling::{CapabilityCache, SignalingTransport};

pub struct EngineContext {
    pub config: JingleConfig,
    pub signaling: Arc<dyn SignalingTransport>,
    pub capabilities: Arc<CapabilityCache>,
    pub media: Arc<dyn MediaEngine>,
    pub harvesters: Arc<dyn HarvesterFactory>,
    pub compat: Arc<dyn CompatibilityPolicy>,
    pub events: broadcast::Sender<PeerEvent>,
}

impl EngineContext {
    /// Publish an event; having no subscriber is not an error
    pub fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }
}
