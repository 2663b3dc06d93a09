//! Throttled conference-info notifications from a focus to its peers

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::info::{ConferenceInfo, DocumentState};
use crate::call::Call;
use crate::config::CoinConfig;
use crate::jingle::{PeerId, Stanza};
use crate::peer::{CallPeer, PeerState};
use crate::signaling::{CapabilityCache, SignalingTransport, FEATURE_COIN};

/// What was last sent to one peer
#[derive(Debug, Default)]
struct CoinPeerState {
    /// A delayed notification is pending
    scheduled: bool,
    last_sent_at: Option<Instant>,
    last_sent: Option<ConferenceInfo>,
}

pub struct ConferenceNotifier {
    config: CoinConfig,
    signaling: Arc<dyn SignalingTransport>,
    capabilities: Arc<CapabilityCache>,
    peers: DashMap<PeerId, Arc<Mutex<CoinPeerState>>>,
}

impl ConferenceNotifier {
    pub fn new(config: CoinConfig, signaling: Arc<dyn SignalingTransport>, capabilities: Arc<CapabilityCache>) -> Self {
        Self {
            config,
            signaling,
            capabilities,
            peers: DashMap::new(),
        }
    }

    fn peer_state(&self, peer: PeerId) -> Arc<Mutex<CoinPeerState>> {
        self.peers.entry(peer).or_default().clone()
    }

    /// Forget what was sent to `peer`
    pub fn remove_peer(&self, peer: PeerId) {
        self.peers.remove(&peer);
    }

    /// Version of the last document sent to `peer`
    pub async fn last_version(&self, peer: PeerId) -> Option<u64> {
        let state = self.peers.get(&peer).map(|s| s.clone())?;
        let guard = state.lock().await;
        guard.last_sent.as_ref().map(|d| d.version)
    }

    fn suppressed_for(state: PeerState) -> bool {
        matches!(
            state,
            PeerState::Idle
                | PeerState::InitiatingCall
                | PeerState::Connecting
                | PeerState::Disconnected
                | PeerState::Failed
                | PeerState::Busy
        )
    }

    async fn supports_coin(&self, peer: &CallPeer) -> bool {
        match self.capabilities.features(peer.remote()).await {
            Ok(features) => features.supports(FEATURE_COIN),
            Err(e) => {
                warn!("Cannot check conference-info support of {}: {}", peer.remote(), e);
                true
            }
        }
    }

    /// Send `peer` the current conference view of `call`, as a diff when
    /// something was sent before. Calls closer together than the minimum
    /// interval are coalesced into one delayed send.
    pub fn notify<'a>(self: &'a Arc<Self>, call: &'a Arc<Call>, peer: &'a Arc<CallPeer>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if self.config.disabled || !call.is_conference_focus() {
                return;
            }
            let peer_state = peer.state();
            if Self::suppressed_for(peer_state) {
                trace!("Not notifying {} in state {}", peer.remote(), peer_state);
                return;
            }
            if !self.supports_coin(peer).await {
                trace!("{} does not support conference-info", peer.remote());
                return;
            }

            let state = self.peer_state(peer.id());
            let mut guard = state.lock().await;
            if guard.scheduled {
                return;
            }

            let interval = self.config.min_interval();
            if let Some(last) = guard.last_sent_at {
                let elapsed = last.elapsed();
                if elapsed < interval {
                    guard.scheduled = true;
                    let delay = interval - elapsed + Duration::from_millis(1);
                    debug!("Delaying conference-info to {} by {:?}", peer.remote(), delay);

                    let notifier = self.clone();
                    let call = call.clone();
                    let peer = peer.clone();
                    let state = state.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        state.lock().await.scheduled = false;
                        notifier.notify(&call, &peer).await;
                    });
                    return;
                }
            }

            let mut view = call.conference_view_for(peer);
            let document = match guard.last_sent.as_ref() {
                None => {
                    view.version = 1;
                    view.state = DocumentState::Full;
                    view.clone()
                }
                Some(last) => {
                    view.version = last.version + 1;
                    let document = if self.config.partial_notifications {
                        ConferenceInfo::diff(last, &view)
                    } else if !last.same_view(&view) {
                        Some(view.clone())
                    } else {
                        None
                    };
                    match document {
                        Some(document) => document,
                        None => {
                            trace!("Conference view for {} unchanged", peer.remote());
                            return;
                        }
                    }
                }
            };

            debug!(
                "Sending conference-info v{} ({:?}, {} user(s)) to {}",
                document.version,
                document.state,
                document.users.len(),
                peer.remote()
            );
            if let Err(e) = self.signaling.send(peer.remote(), Stanza::ConferenceInfo(document)).await {
                warn!("Failed to send conference-info to {}: {:#}", peer.remote(), e);
                return;
            }

            view.state = DocumentState::Full;
            guard.last_sent = Some(view);
            guard.last_sent_at = Some(Instant::now());
        })
    }
}
