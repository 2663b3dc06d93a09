//! A call groups the peers sharing one conversation. When the local side is
//! the conference focus, the call builds the conference view each peer is
//! told about and supplies the cross-peer facts media negotiation needs.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::conference::{ConferenceInfo, ConferenceNotifier, EndpointInfo, EndpointStatus, MediaInfo, UserInfo};
use crate::context::EngineContext;
use crate::error::{JingleError, Result};
use crate::jingle::{Direction, Jid, MediaType, PeerId, SessionId, Transfer};
use crate::manager::ManagerShared;
use crate::media::FocusContext;
use crate::peer::{CallPeer, PeerState};
use crate::protocol::{JingleProtocol, SessionProtocol};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub Uuid);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct Call {
    id: CallId,
    context: Arc<EngineContext>,
    notifier: Arc<ConferenceNotifier>,
    manager: Weak<ManagerShared>,
    peers: RwLock<Vec<Arc<CallPeer>>>,
    conference_focus: AtomicBool,
}

impl Call {
    pub(crate) fn new(
        context: Arc<EngineContext>,
        notifier: Arc<ConferenceNotifier>,
        manager: Weak<ManagerShared>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: CallId::new(),
            context,
            notifier,
            manager,
            peers: RwLock::new(Vec::new()),
            conference_focus: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> CallId {
        self.id
    }

    pub fn peers(&self) -> Vec<Arc<CallPeer>> {
        self.peers.read().clone()
    }

    pub fn peer(&self, id: PeerId) -> Option<Arc<CallPeer>> {
        self.peers.read().iter().find(|p| p.id() == id).cloned()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_conference_focus(&self) -> bool {
        self.conference_focus.load(Ordering::SeqCst)
    }

    pub fn rtp_translation(&self) -> bool {
        self.context.config.media.rtp_translation
    }

    pub(crate) fn add_peer(self: &Arc<Self>, remote: Jid, protocol: Arc<dyn SessionProtocol>) -> Arc<CallPeer> {
        let peer = Arc::new(CallPeer::new(
            remote,
            Arc::downgrade(self),
            self.context.clone(),
            protocol,
        ));
        self.peers.write().push(peer.clone());
        debug!("Call {} now has {} peer(s)", self.id, self.peer_count());
        peer
    }

    /// Call `remote` as part of this call. A second peer makes the call a
    /// conference with us as its focus.
    pub async fn invite(self: &Arc<Self>, remote: Jid) -> Result<Arc<CallPeer>> {
        self.invite_with(remote, None).await
    }

    /// [`invite`](Self::invite) whose session-initiate carries `transfer`
    pub async fn invite_with(self: &Arc<Self>, remote: Jid, transfer: Option<Transfer>) -> Result<Arc<CallPeer>> {
        // The dialect is settled from the remote features when initiating
        let peer = self.add_peer(remote, Arc::new(JingleProtocol));
        if self.peer_count() > 1 {
            self.set_conference_focus(true).await;
        }
        peer.initiate_with(transfer).await?;
        Ok(peer)
    }

    /// Announce the change to every established peer
    pub async fn set_conference_focus(self: &Arc<Self>, focus: bool) {
        if self.conference_focus.swap(focus, Ordering::SeqCst) == focus {
            return;
        }
        info!("Call {} conference focus: {}", self.id, focus);

        let established: Vec<Arc<CallPeer>> = self
            .peers()
            .into_iter()
            .filter(|p| p.state().is_established())
            .collect();
        for peer in established {
            if let Err(e) = peer.announce_focus(focus).await {
                warn!("Failed to announce focus change to {}: {}", peer.remote(), e);
            }
        }
        self.conference_changed();
    }

    /// What peer `peer` needs to know about the others
    pub fn focus_context(&self, peer: PeerId) -> FocusContext {
        let mut context = FocusContext {
            is_focus: self.is_conference_focus(),
            rtp_translation: self.rtp_translation(),
            ..Default::default()
        };

        for other in self.peers() {
            let snapshot = other.snapshot();
            for media in MediaType::ALL {
                if other.id() != peer && snapshot.receives(media) {
                    context.others_receiving.insert(media);
                }
                if snapshot.sends_to_us(media) {
                    context.peers_sending.insert(media);
                }
            }
        }
        context
    }

    /// Conference view as seen by `peer`: ourselves first, then one user per
    /// peer of the call
    pub fn conference_view_for(&self, peer: &CallPeer) -> ConferenceInfo {
        let local = self.context.signaling.local_jid();
        let target = peer.snapshot();
        let peers = self.peers();

        let local_media = MediaType::ALL
            .into_iter()
            .filter_map(|media| {
                let direction = Direction::new(target.local_transmission.contains(&media), target.sends_to_us(media));
                let src_id = target.local_source_ids.get(&media).copied();
                (src_id.is_some() || direction != Direction::Inactive).then(|| MediaInfo {
                    id: media.as_str().to_string(),
                    media_type: media,
                    src_id,
                    status: direction,
                })
            })
            .collect();

        let mut users = vec![UserInfo {
            endpoints: vec![EndpointInfo {
                entity: local.to_string(),
                status: Some(EndpointStatus::Connected),
                media: local_media,
            }],
            ..UserInfo::new(local.to_string())
        }];

        for other in &peers {
            let snapshot = other.snapshot();
            let media = MediaType::ALL
                .into_iter()
                .filter_map(|media| {
                    let direction = snapshot.directions.get(&media)?;
                    Some(MediaInfo {
                        id: media.as_str().to_string(),
                        media_type: media,
                        src_id: snapshot.remote_source_ids.get(&media).copied(),
                        status: direction.reverse(),
                    })
                })
                .collect();

            users.push(UserInfo {
                endpoints: vec![EndpointInfo {
                    entity: other.remote().to_string(),
                    status: Some(EndpointStatus::from(snapshot.state)),
                    media,
                }],
                ..UserInfo::new(other.remote().to_string())
            });
        }

        ConferenceInfo {
            user_count: 1 + peers.len(),
            users,
            ..ConferenceInfo::new(local.to_string())
        }
    }

    /// Push the conference view to every peer in the background
    pub fn conference_changed(self: &Arc<Self>) {
        if !self.is_conference_focus() || self.context.config.coin.disabled {
            return;
        }
        let call = self.clone();
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            let peers = call.peers();
            join_all(peers.iter().map(|peer| notifier.notify(&call, peer))).await;
        });
    }

    pub(crate) fn peer_state_changed(self: &Arc<Self>, peer: &Arc<CallPeer>, state: PeerState) {
        if state.is_terminal() {
            self.peers.write().retain(|p| p.id() != peer.id());
            self.notifier.remove_peer(peer.id());
            if let Some(manager) = self.manager.upgrade() {
                if let Some(sid) = peer.session_id() {
                    manager.unregister_session(&sid);
                }
                if self.peer_count() == 0 {
                    manager.remove_call(self.id);
                }
            }
        }
        self.conference_changed();
    }

    pub(crate) fn register_session(&self, sid: &SessionId, peer: &Arc<CallPeer>) {
        if let Some(manager) = self.manager.upgrade() {
            manager.register_session(sid.clone(), peer.clone());
        }
    }

    pub(crate) fn unregister_session(&self, sid: &SessionId) {
        if let Some(manager) = self.manager.upgrade() {
            manager.unregister_session(sid);
        }
    }

    pub(crate) async fn place_transfer_call(&self, to: Jid, transfer: Transfer) -> Result<()> {
        let manager = self
            .manager
            .upgrade()
            .ok_or_else(|| JingleError::internal("call manager is gone"))?;
        manager.place_transfer_call(to, transfer).await.map(|_| ())
    }

    /// Allow or forbid local video towards every peer
    pub async fn modify_video(&self, allowed: bool) -> Result<()> {
        let mut first_error = None;
        for peer in self.peers() {
            if let Err(e) = peer.set_local_video_allowed(allowed).await {
                warn!("Could not change video for {}: {}", peer.remote(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub async fn hangup_all(&self) {
        for peer in self.peers() {
            if let Err(e) = peer.hangup(None).await {
                warn!("Hangup of {} failed: {}", peer.remote(), e);
            }
        }
    }
}
