//! Entry point of the engine: owns the calls, routes inbound messages to
//! their sessions and publishes peer events.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::call::{Call, CallId};
use crate::conference::{ConferenceInfo, ConferenceNotifier};
use crate::config::JingleConfig;
use crate::context::EngineContext;
use crate::error::{JingleError, Result};
use crate::events::{PeerEvent, EVENT_CHANNEL_CAPACITY};
use crate::jingle::{Jid, JingleAction, JingleMessage, SessionId, Transfer};
use crate::media::{HarvesterFactory, MediaEngine, UdpHarvesterFactory};
use crate::peer::{CallPeer, CompatibilityPolicy, IdentityPolicy};
use crate::protocol::{protocol_for, GTalkSession, ProtocolVariant, SessionProtocol};
use crate::signaling::{CapabilityCache, SignalingTransport};

pub(crate) struct ManagerShared {
    context: Arc<EngineContext>,
    notifier: Arc<ConferenceNotifier>,
    calls: DashMap<CallId, Arc<Call>>,
    sessions: DashMap<SessionId, Arc<CallPeer>>,
}

impl ManagerShared {
    fn create_call(self: &Arc<Self>) -> Arc<Call> {
        let call = Call::new(self.context.clone(), self.notifier.clone(), Arc::downgrade(self));
        self.calls.insert(call.id(), call.clone());
        debug!("Created call {}", call.id());
        call
    }

    pub(crate) fn register_session(&self, sid: SessionId, peer: Arc<CallPeer>) {
        self.sessions.insert(sid, peer);
    }

    pub(crate) fn unregister_session(&self, sid: &SessionId) {
        self.sessions.remove(sid);
    }

    pub(crate) fn remove_call(&self, id: CallId) {
        if self.calls.remove(&id).is_some() {
            debug!("Removed call {}", id);
        }
    }

    /// New call to `to` on behalf of a transfer request
    pub(crate) async fn place_transfer_call(self: &Arc<Self>, to: Jid, transfer: Transfer) -> Result<Arc<CallPeer>> {
        info!(
            "Placing {} transfer call to {}",
            if transfer.sid.is_some() { "attended" } else { "unattended" },
            to
        );
        // The callee learns who sent it, and with a sid which session of
        // the attendant it replaces
        let attended = transfer.sid.is_some();
        let announced = Transfer {
            from: transfer.from,
            to: attended.then(|| to.clone()),
            sid: transfer.sid,
        };
        let call = self.create_call();
        call.invite_with(to, Some(announced)).await
    }

    /// Call of the session an attended-transfer initiate replaces, when the
    /// transfer names one of our sessions with its sender
    fn attended_transfer_call(&self, message: &JingleMessage) -> Option<Arc<Call>> {
        let transfer = message.transfer.as_ref()?;
        let sid = SessionId::from(transfer.sid.as_deref()?);
        let attendant = self.sessions.get(&sid).map(|p| p.clone())?;

        let local = self.context.signaling.local_jid();
        let legal = transfer.from.as_ref() == Some(attendant.remote()) && transfer.to.as_ref() == Some(&local);
        if !legal {
            debug!("Transfer of {} does not involve us, starting a new call", sid);
            return None;
        }
        attendant.call()
    }

    async fn accept_initiate(
        self: &Arc<Self>,
        from: &Jid,
        message: JingleMessage,
        protocol: Arc<dyn SessionProtocol>,
    ) -> Result<()> {
        if self.sessions.contains_key(&message.sid) {
            return Err(JingleError::protocol(format!("duplicate session-initiate for {}", message.sid)));
        }
        info!(
            "Incoming {} call from {} (session {})",
            protocol.variant(),
            from,
            message.sid
        );

        let call = match self.attended_transfer_call(&message) {
            Some(call) => {
                info!("{} joins call {} after an attended transfer", from, call.id());
                call
            }
            None => self.create_call(),
        };
        let peer = call.add_peer(from.clone(), protocol);
        self.register_session(message.sid.clone(), peer.clone());
        peer.handle_incoming_initiate(message).await
    }

    async fn route(&self, from: &Jid, message: JingleMessage) -> Result<()> {
        let peer = self
            .sessions
            .get(&message.sid)
            .map(|p| p.clone())
            .ok_or_else(|| JingleError::SessionNotFound {
                sid: message.sid.to_string(),
            })?;
        if peer.remote() != from {
            warn!("Dropping {} for {} sent by {}", message.action, message.sid, from);
            return Err(JingleError::protocol(format!(
                "{} is not the remote party of session {}",
                from, message.sid
            )));
        }
        peer.handle_message(message).await
    }
}

pub struct CallManager {
    shared: Arc<ManagerShared>,
}

impl CallManager {
    /// Engine with UDP harvesters and identity-based interop policy
    pub fn new(
        config: JingleConfig,
        signaling: Arc<dyn SignalingTransport>,
        media: Arc<dyn MediaEngine>,
    ) -> Result<Self> {
        let harvesters = Arc::new(UdpHarvesterFactory::new(config.transport.clone()));
        let compat = Arc::new(IdentityPolicy::new(&config.compat));
        Self::with_collaborators(config, signaling, media, harvesters, compat)
    }

    pub fn with_collaborators(
        config: JingleConfig,
        signaling: Arc<dyn SignalingTransport>,
        media: Arc<dyn MediaEngine>,
        harvesters: Arc<dyn HarvesterFactory>,
        compat: Arc<dyn CompatibilityPolicy>,
    ) -> Result<Self> {
        config.validate()?;

        let capabilities = Arc::new(CapabilityCache::new(signaling.clone()));
        let notifier = Arc::new(ConferenceNotifier::new(
            config.coin.clone(),
            signaling.clone(),
            capabilities.clone(),
        ));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let context = Arc::new(EngineContext {
            config,
            signaling,
            capabilities,
            media,
            harvesters,
            compat,
            events,
        });

        Ok(Self {
            shared: Arc::new(ManagerShared {
                context,
                notifier,
                calls: DashMap::new(),
                sessions: DashMap::new(),
            }),
        })
    }

    pub fn config(&self) -> &JingleConfig {
        &self.shared.context.config
    }

    pub fn capabilities(&self) -> &Arc<CapabilityCache> {
        &self.shared.context.capabilities
    }

    pub fn notifier(&self) -> &Arc<ConferenceNotifier> {
        &self.shared.notifier
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.shared.context.events.subscribe()
    }

    /// Empty call; peers are added with [`Call::invite`]
    pub fn create_call(&self) -> Arc<Call> {
        self.shared.create_call()
    }

    /// Outgoing call to `remote`
    pub async fn call(&self, remote: Jid) -> Result<Arc<CallPeer>> {
        self.create_call().invite(remote).await
    }

    pub fn get_call(&self, id: CallId) -> Option<Arc<Call>> {
        self.shared.calls.get(&id).map(|c| c.clone())
    }

    pub fn calls(&self) -> Vec<Arc<Call>> {
        self.shared.calls.iter().map(|c| c.value().clone()).collect()
    }

    pub fn peer_by_session(&self, sid: &SessionId) -> Option<Arc<CallPeer>> {
        self.shared.sessions.get(sid).map(|p| p.clone())
    }

    /// Route a Jingle message from `from`. A session-initiate for an
    /// unknown session starts a new incoming call.
    pub async fn handle_inbound(&self, from: &Jid, message: JingleMessage) -> Result<()> {
        if message.action == JingleAction::SessionInitiate {
            return self
                .shared
                .accept_initiate(from, message, protocol_for(ProtocolVariant::Jingle))
                .await;
        }
        self.shared.route(from, message).await
    }

    /// Route a legacy Google Talk session message from `from`. It is handled
    /// as its Jingle equivalent; replies to a new session use Google Talk.
    pub async fn handle_inbound_gtalk(&self, from: &Jid, session: GTalkSession) -> Result<()> {
        let message = session.into_jingle()?;
        if message.action == JingleAction::SessionInitiate {
            return self
                .shared
                .accept_initiate(from, message, protocol_for(ProtocolVariant::GTalk))
                .await;
        }
        self.shared.route(from, message).await
    }

    /// Conference-info pushed by a focus we are in a session with
    pub fn handle_conference_info(&self, from: &Jid, info: ConferenceInfo) -> Result<bool> {
        let peer = self
            .shared
            .sessions
            .iter()
            .find(|entry| entry.value().remote() == from)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| JingleError::SessionNotFound { sid: from.to_string() })?;
        Ok(peer.handle_conference_info(info))
    }

    /// Call `to` on behalf of a transfer
    pub async fn place_transfer_call(&self, to: Jid, transfer: Transfer) -> Result<Arc<CallPeer>> {
        self.shared.place_transfer_call(to, transfer).await
    }

    /// Hang up every call
    pub async fn shutdown(&self) {
        info!("Shutting down call manager with {} call(s)", self.shared.calls.len());
        for call in self.calls() {
            call.hangup_all().await;
        }
        self.shared.calls.clear();
        self.shared.sessions.clear();
    }
}
