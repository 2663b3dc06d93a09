//! Media negotiation and the seams to the media engine and transports

pub mod engine;
pub mod negotiator;

use std::sync::Arc;

use rvoip_jingle_transport::{HarvesterConfig, IceRole, IceUdpHarvester, RawUdpHarvester, TransportHarvester, TransportKind};

pub use engine::{MediaDevice, MediaEngine, StreamId, StreamParams};
pub use negotiator::{adjust_video_senders, reconcile_senders_change, FocusContext, MediaNegotiator, NegotiatedStream};

/// Builds the harvester of a session once its transport is known
pub trait HarvesterFactory: Send + Sync {
    fn create(&self, kind: TransportKind, local_is_initiator: bool) -> Arc<dyn TransportHarvester>;
}

/// Harvesters bound to real UDP sockets
#[derive(Debug, Clone, Default)]
pub struct UdpHarvesterFactory {
    config: HarvesterConfig,
}

impl UdpHarvesterFactory {
    pub fn new(config: HarvesterConfig) -> Self {
        Self { config }
    }
}

impl HarvesterFactory for UdpHarvesterFactory {
    fn create(&self, kind: TransportKind, local_is_initiator: bool) -> Arc<dyn TransportHarvester> {
        match kind {
            TransportKind::RawUdp => Arc::new(RawUdpHarvester::new(self.config.clone())),
            TransportKind::IceUdp => {
                let role = if local_is_initiator {
                    IceRole::Controlling
                } else {
                    IceRole::Controlled
                };
                Arc::new(IceUdpHarvester::new(self.config.clone(), role))
            }
        }
    }
}
