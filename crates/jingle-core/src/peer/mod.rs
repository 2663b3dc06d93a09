//! The state machine of one Jingle session with one remote endpoint.
//!
//! A `CallPeer` turns inbound Jingle messages and local API calls into
//! negotiator decisions, harvester steps and outbound messages. Media state
//! lives in a [`MediaNegotiator`] behind an async mutex; the transport
//! harvester is kept outside of it so transport-info can reach the harvester
//! while `answer()` waits for connectivity.
//!
//! Other peers of the same call only ever see a [`PeerSnapshot`].

mod compat;
mod deferred;
mod state;

pub use compat::{CompatibilityPolicy, IdentityPolicy, StrictPolicy};
pub use deferred::DeferredContentQueue;
pub use state::PeerState;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rvoip_jingle_transport::{TransportDescription, TransportHarvester, TransportKind};
use tracing::{debug, info, warn};

use crate::call::Call;
use crate::conference::{ConferenceInfo, ReceivedConference};
use crate::context::EngineContext;
use crate::error::{JingleError, Result};
use crate::events::PeerEvent;
use crate::jingle::{
    Content, Direction, Jid, JingleAction, JingleMessage, MediaType, PeerId, Senders, SessionId, SessionInfo,
    TerminateReason, Transfer,
};
use crate::media::{adjust_video_senders, reconcile_senders_change, FocusContext, MediaNegotiator};
use crate::protocol::{protocol_for, ProtocolVariant, SessionProtocol};

/// Read-only view of a peer, used for cross-peer decisions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerSnapshot {
    pub state: PeerState,
    pub local_is_initiator: bool,
    /// Direction of each running or planned stream
    pub directions: HashMap<MediaType, Direction>,
    /// Senders of each remote content
    pub senders: HashMap<MediaType, Option<Senders>>,
    /// Media we actually transmit to this peer
    pub local_transmission: HashSet<MediaType>,
    pub local_source_ids: HashMap<MediaType, u32>,
    pub remote_source_ids: HashMap<MediaType, u32>,
    pub locally_on_hold: bool,
}

impl PeerSnapshot {
    /// The remote side is allowed to send `media` to us
    pub fn sends_to_us(&self, media: MediaType) -> bool {
        self.senders
            .get(&media)
            .is_some_and(|senders| Senders::direction_of(*senders, !self.local_is_initiator).allows_sending())
    }

    /// Our stream for `media` receives from this peer
    pub fn receives(&self, media: MediaType) -> bool {
        self.directions.get(&media).is_some_and(|d| d.allows_receiving())
    }
}

#[derive(Debug, Default)]
struct SessionSlot {
    sid: Option<SessionId>,
    /// Hung up before our session-initiate went out
    cancelled: bool,
    /// A session id exists but the session-initiate is still being sent
    initiating: bool,
}

/// Holds transport-info back until our initiate went out, or the remote
/// initiate was processed
#[derive(Debug, Default)]
struct TransportInfoGate {
    open: bool,
    pending: Vec<JingleMessage>,
}

pub struct CallPeer {
    id: PeerId,
    remote: Jid,
    call: Weak<Call>,
    context: Arc<EngineContext>,
    state: RwLock<PeerState>,
    session: Mutex<SessionSlot>,
    gate: Mutex<TransportInfoGate>,
    harvester: RwLock<Option<Arc<dyn TransportHarvester>>>,
    negotiator: tokio::sync::Mutex<MediaNegotiator>,
    snapshot: RwLock<PeerSnapshot>,
    deferred: Mutex<DeferredContentQueue>,
    pending_accept: Mutex<Option<JingleMessage>>,
    terminate_sent: AtomicBool,
    remote_is_focus: AtomicBool,
    conference: Mutex<ReceivedConference>,
    protocol: RwLock<Arc<dyn SessionProtocol>>,
}

impl CallPeer {
    pub(crate) fn new(
        remote: Jid,
        call: Weak<Call>,
        context: Arc<EngineContext>,
        protocol: Arc<dyn SessionProtocol>,
    ) -> Self {
        let negotiator = MediaNegotiator::new(context.media.clone(), context.config.media.clone());
        Self {
            id: PeerId::new(),
            remote,
            call,
            context,
            state: RwLock::new(PeerState::Idle),
            session: Mutex::new(SessionSlot::default()),
            gate: Mutex::new(TransportInfoGate::default()),
            harvester: RwLock::new(None),
            negotiator: tokio::sync::Mutex::new(negotiator),
            snapshot: RwLock::new(PeerSnapshot::default()),
            deferred: Mutex::new(DeferredContentQueue::new()),
            pending_accept: Mutex::new(None),
            terminate_sent: AtomicBool::new(false),
            remote_is_focus: AtomicBool::new(false),
            conference: Mutex::new(ReceivedConference::new()),
            protocol: RwLock::new(protocol),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn remote(&self) -> &Jid {
        &self.remote
    }

    pub fn state(&self) -> PeerState {
        *self.state.read()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.lock().sid.clone()
    }

    pub fn snapshot(&self) -> PeerSnapshot {
        self.snapshot.read().clone()
    }

    pub fn call(&self) -> Option<Arc<Call>> {
        self.call.upgrade()
    }

    /// The remote side announced itself as a conference focus
    pub fn remote_is_focus(&self) -> bool {
        self.remote_is_focus.load(Ordering::SeqCst)
    }

    /// Conference view received from a remote focus
    pub fn received_conference(&self) -> Option<ConferenceInfo> {
        self.conference.lock().current().cloned()
    }

    /// Signaling dialect of this session
    pub fn protocol(&self) -> ProtocolVariant {
        self.protocol.read().variant()
    }

    fn dialect(&self) -> Arc<dyn SessionProtocol> {
        self.protocol.read().clone()
    }

    pub fn is_locally_on_hold(&self) -> bool {
        self.snapshot.read().locally_on_hold
    }

    fn harvester(&self) -> Result<Arc<dyn TransportHarvester>> {
        self.harvester
            .read()
            .clone()
            .ok_or_else(|| JingleError::invalid_state("no transport harvester for this session"))
    }

    fn focus_context(&self) -> FocusContext {
        match self.call() {
            Some(call) => call.focus_context(self.id),
            None => FocusContext {
                rtp_translation: self.context.config.media.rtp_translation,
                ..Default::default()
            },
        }
    }

    fn require_sid(&self) -> Result<SessionId> {
        self.session_id()
            .ok_or_else(|| JingleError::invalid_state("no session id assigned yet"))
    }

    fn message(&self, action: JingleAction) -> Result<JingleMessage> {
        Ok(JingleMessage::new(action, self.require_sid()?))
    }

    async fn send(&self, mut message: JingleMessage) -> Result<()> {
        let protocol = self.dialect();
        if protocol.initiator_on_every_message() && message.initiator.is_none() {
            message.initiator = Some(self.session_initiator());
        }
        debug!("Sending {} to {} ({})", message.action, self.remote, protocol.variant());

        for stanza in protocol.encode(&self.remote, message) {
            self.context
                .signaling
                .send(&self.remote, stanza)
                .await
                .map_err(|e| JingleError::signaling(format!("{:#}", e)))?;
        }
        Ok(())
    }

    fn session_initiator(&self) -> Jid {
        if self.snapshot.read().local_is_initiator {
            self.context.signaling.local_jid()
        } else {
            self.remote.clone()
        }
    }

    /// Send a session-terminate at most once, and never before a session id
    /// exists or after a terminal state was reached
    async fn send_terminate(&self, reason: TerminateReason, text: Option<String>) {
        if self.state().is_terminal() {
            return;
        }
        let Some(sid) = self.session_id() else {
            return;
        };
        if self.terminate_sent.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.send(JingleMessage::terminate(sid, reason, text)).await {
            warn!("Failed to send session-terminate to {}: {}", self.remote, e);
        }
    }

    /// Best-effort terminate, then `Failed`
    async fn fail(self: &Arc<Self>, reason: TerminateReason, text: String) {
        warn!("Session with {} failed: {}", self.remote, text);
        self.send_terminate(reason, Some(text.clone())).await;
        self.transition(PeerState::Failed, Some(text)).await;
    }

    async fn transition(self: &Arc<Self>, new_state: PeerState, reason: Option<String>) {
        let old_state = {
            let mut state = self.state.write();
            if state.is_terminal() || *state == new_state {
                return;
            }
            std::mem::replace(&mut *state, new_state)
        };
        self.snapshot.write().state = new_state;

        info!("Peer {} state {} -> {}", self.remote, old_state, new_state);
        self.context.emit(PeerEvent::StateChanged {
            peer: self.id,
            session_id: self.session_id(),
            remote: self.remote.clone(),
            old_state,
            new_state,
            timestamp: Utc::now(),
            reason,
        });

        if new_state.is_terminal() {
            self.release().await;
        }
        if let Some(call) = self.call() {
            call.peer_state_changed(self, new_state);
        }
    }

    /// Stop streams, close the harvester and drop parked requests
    async fn release(&self) {
        // Closing first wakes a harvest or connectivity wait that answer()
        // may be blocked on
        let harvester = self.harvester.read().clone();
        if let Some(harvester) = harvester {
            harvester.close().await;
        }
        self.negotiator.lock().await.close().await;

        self.deferred.lock().clear();
        self.pending_accept.lock().take();
        self.gate.lock().pending.clear();
    }

    fn publish(&self, negotiator: &MediaNegotiator) {
        {
            let mut snapshot = self.snapshot.write();
            snapshot.local_is_initiator = negotiator.local_is_initiator();
            snapshot.locally_on_hold = negotiator.is_locally_on_hold();
            snapshot.directions.clear();
            snapshot.senders.clear();
            snapshot.local_transmission.clear();
            snapshot.local_source_ids.clear();
            snapshot.remote_source_ids.clear();

            for media in MediaType::ALL {
                if let Some(stream) = negotiator.stream(media) {
                    snapshot.directions.insert(media, stream.direction);
                    let video_ok = media == MediaType::Audio || negotiator.local_video_allowed();
                    if stream.direction.allows_sending() && !stream.muted && video_ok {
                        snapshot.local_transmission.insert(media);
                    }
                }
                if let Some(content) = negotiator.remote_content_for(media) {
                    snapshot.senders.insert(media, content.senders);
                }
                if let Some(ssrc) = negotiator.local_source_id(media) {
                    snapshot.local_source_ids.insert(media, ssrc);
                }
                if let Some(ssrc) = negotiator.remote_source_id(media) {
                    snapshot.remote_source_ids.insert(media, ssrc);
                }
            }
        }

        if let Some(call) = self.call() {
            call.conference_changed();
        }
    }

    /// Place the outgoing call: choose a transport, offer our contents and
    /// send session-initiate
    pub async fn initiate(self: &Arc<Self>) -> Result<SessionId> {
        self.initiate_with(None).await
    }

    /// Like [`initiate`](Self::initiate), announcing that the new session
    /// replaces the one named in `transfer`
    pub async fn initiate_with(self: &Arc<Self>, transfer: Option<Transfer>) -> Result<SessionId> {
        if self.state() != PeerState::Idle {
            return Err(JingleError::invalid_state(format!(
                "cannot initiate a session in state {}",
                self.state()
            )));
        }
        self.transition(PeerState::InitiatingCall, None).await;

        match self.send_initiate(transfer).await {
            Ok(sid) => {
                self.transition(PeerState::Connecting, None).await;
                self.open_transport_gate().await;
                Ok(sid)
            }
            Err(e) if matches!(e, JingleError::Cancelled) || self.state().is_terminal() => {
                info!("Call to {} cancelled while it was being placed: {}", self.remote, e);
                Err(JingleError::Cancelled)
            }
            Err(e) => {
                self.fail(TerminateReason::GeneralError, e.reason_text()).await;
                Err(e)
            }
        }
    }

    async fn send_initiate(self: &Arc<Self>, transfer: Option<Transfer>) -> Result<SessionId> {
        let features = self.context.capabilities.features(&self.remote).await?;
        let variant = ProtocolVariant::for_features(&features);
        let kind = match variant {
            ProtocolVariant::GTalk => TransportKind::IceUdp,
            ProtocolVariant::Jingle => {
                features
                    .preferred_transport()
                    .ok_or_else(|| JingleError::UnsupportedTransport {
                        peer: self.remote.to_string(),
                    })?
            }
        };
        *self.protocol.write() = protocol_for(variant);

        let focus = self.focus_context();
        let mut contents = {
            let mut negotiator = self.negotiator.lock().await;
            negotiator.set_local_is_initiator(true);
            negotiator.create_content_list(&focus)?
        };

        let harvester = self.context.harvesters.create(kind, true);
        *self.harvester.write() = Some(harvester.clone());

        let names: Vec<String> = contents.iter().map(|c| c.name.clone()).collect();
        harvester.start_harvest(&names).await?;
        attach_transports(&mut contents, harvester.wrapup().await?);

        let sid = {
            let mut session = self.session.lock();
            if session.cancelled {
                None
            } else {
                let sid = SessionId::new();
                session.sid = Some(sid.clone());
                session.initiating = true;
                Some(sid)
            }
        };
        let Some(sid) = sid else {
            harvester.close().await;
            return Err(JingleError::Cancelled);
        };

        {
            let mut negotiator = self.negotiator.lock().await;
            negotiator.set_owner(sid.clone());
            self.publish(&negotiator);
        }
        if let Some(call) = self.call() {
            call.register_session(&sid, self);
        }

        let mut message = JingleMessage::new(JingleAction::SessionInitiate, sid.clone())
            .with_initiator(self.context.signaling.local_jid())
            .with_responder(self.remote.clone())
            .with_contents(contents);
        if self.call().is_some_and(|c| c.is_conference_focus()) {
            message = message.with_conference_focus(true);
        }
        if let Some(transfer) = transfer {
            message = message.with_transfer(transfer);
        }

        let cancelled = {
            let mut session = self.session.lock();
            session.initiating = !session.cancelled;
            session.cancelled
        };
        if cancelled {
            harvester.close().await;
            if let Some(call) = self.call() {
                call.unregister_session(&sid);
            }
            return Err(JingleError::Cancelled);
        }

        let sent = self.send(message).await;
        let cancelled = {
            let mut session = self.session.lock();
            session.initiating = false;
            session.cancelled
        };
        sent?;

        if cancelled {
            // The hangup arrived while the initiate was on the wire and left
            // the terminate to us
            if !self.terminate_sent.swap(true, Ordering::SeqCst) {
                let cancel = JingleMessage::terminate(sid, TerminateReason::Cancel, None);
                if let Err(e) = self.send(cancel).await {
                    warn!("Failed to cancel session with {}: {}", self.remote, e);
                }
            }
            return Err(JingleError::Cancelled);
        }

        info!(
            "Sent session-initiate {} to {} over {} ({})",
            sid, self.remote, kind, variant
        );
        Ok(sid)
    }

    /// Entry point for every message of this session
    pub async fn handle_message(self: &Arc<Self>, message: JingleMessage) -> Result<()> {
        if self.state().is_terminal() {
            debug!("Ignoring {} for terminated session {}", message.action, message.sid);
            return Ok(());
        }

        match message.action {
            JingleAction::SessionInitiate => self.handle_incoming_initiate(message).await,
            JingleAction::SessionAccept => self.handle_accept(message).await,
            JingleAction::SessionTerminate => {
                self.handle_terminate(message).await;
                Ok(())
            }
            JingleAction::SessionInfo => self.handle_session_info(message).await,
            JingleAction::ContentAdd => self.handle_content_add(message).await,
            JingleAction::ContentAccept => self.handle_content_accept(message).await,
            JingleAction::ContentModify => self.handle_content_modify(message).await,
            JingleAction::ContentReject => self.handle_content_reject(message).await,
            JingleAction::ContentRemove => self.handle_content_remove(message).await,
            JingleAction::TransportInfo => self.handle_transport_info(message).await,
        }
    }

    pub async fn handle_incoming_initiate(self: &Arc<Self>, message: JingleMessage) -> Result<()> {
        if self.state() != PeerState::Idle {
            return Err(JingleError::protocol(format!(
                "session-initiate received in state {}",
                self.state()
            )));
        }

        self.session.lock().sid = Some(message.sid.clone());
        if let Some(is_focus) = message.conference_focus {
            self.remote_is_focus.store(is_focus, Ordering::SeqCst);
        }

        let focus = self.focus_context();
        let answer = {
            let mut negotiator = self.negotiator.lock().await;
            negotiator.set_local_is_initiator(false);
            negotiator.set_owner(message.sid.clone());
            let answer = negotiator.compute_answer(&message.contents, &focus).await;
            self.publish(&negotiator);
            answer
        };
        let answer = match answer {
            Ok(answer) => answer,
            Err(e) => {
                self.fail(TerminateReason::IncompatibleParameters, e.reason_text()).await;
                return Err(e);
            }
        };

        if let Err(e) = self.start_answer_transport(&message, &answer).await {
            self.fail(e.terminate_reason(), e.reason_text()).await;
            return Err(e);
        }

        self.transition(PeerState::IncomingCall, None).await;

        if self.context.capabilities.cached(&self.remote).is_none() {
            if let Err(e) = self.context.capabilities.features(&self.remote).await {
                warn!("Feature discovery for {} failed: {}", self.remote, e);
            }
        }

        let ringing = JingleMessage::session_info(message.sid.clone(), SessionInfo::Ringing);
        if let Err(e) = self.send(ringing).await {
            warn!("Failed to send ringing to {}: {}", self.remote, e);
        }

        self.open_transport_gate().await;
        Ok(())
    }

    /// Create the harvester for an incoming offer, start harvesting our
    /// answer and feed the offered candidates
    async fn start_answer_transport(&self, offer: &JingleMessage, answer: &[Content]) -> Result<()> {
        let kind = match offer.contents.iter().find_map(|c| c.transport.as_ref().map(|t| t.kind)) {
            Some(kind) => kind,
            None => self
                .context
                .capabilities
                .features(&self.remote)
                .await
                .ok()
                .and_then(|f| f.preferred_transport())
                .unwrap_or(TransportKind::RawUdp),
        };

        let harvester = self.context.harvesters.create(kind, false);
        *self.harvester.write() = Some(harvester.clone());

        let names: Vec<String> = answer.iter().map(|c| c.name.clone()).collect();
        harvester.start_harvest(&names).await?;
        harvester
            .start_connectivity_establishment(&remote_transports(&offer.contents))
            .await?;
        Ok(())
    }

    /// Accept the incoming call
    pub async fn answer(self: &Arc<Self>) -> Result<()> {
        let state = self.state();
        if !matches!(state, PeerState::IncomingCall | PeerState::AlertingRemoteSide) {
            return Err(JingleError::invalid_state(format!("cannot answer in state {}", state)));
        }
        let harvester = self.harvester()?;
        let focus = self.focus_context();

        let accepted = async {
            harvester.wrapup_connectivity_establishment().await?;
            let transports = harvester.wrapup().await?;

            let mut negotiator = self.negotiator.lock().await;
            let names = negotiator.local_content_names();
            let accepted = negotiator
                .generate_accept(&names, harvester.as_ref(), &transports, &focus)
                .await;
            self.publish(&negotiator);
            accepted
        }
        .await;

        let contents = match accepted {
            Ok(contents) => contents,
            Err(_) if self.state().is_terminal() => {
                info!("Answer to {} abandoned, the call already ended", self.remote);
                return Err(JingleError::Cancelled);
            }
            Err(e) => {
                self.fail(TerminateReason::FailedApplication, e.reason_text()).await;
                return Err(e);
            }
        };

        let accept = self
            .message(JingleAction::SessionAccept)?
            .with_responder(self.context.signaling.local_jid())
            .with_contents(contents);
        if let Err(e) = self.send(accept).await {
            self.fail(TerminateReason::GeneralError, e.reason_text()).await;
            return Err(e);
        }

        if let Err(e) = self.start_streams(harvester.as_ref()).await {
            self.fail(TerminateReason::GeneralError, e.reason_text()).await;
            return Err(e);
        }

        self.transition(PeerState::Connected, None).await;
        Ok(())
    }

    async fn start_streams(&self, harvester: &dyn TransportHarvester) -> Result<()> {
        let mut negotiator = self.negotiator.lock().await;
        let started = negotiator.start_streams(harvester).await;
        self.publish(&negotiator);
        started
    }

    async fn handle_accept(self: &Arc<Self>, message: JingleMessage) -> Result<()> {
        let state = self.state();
        if !matches!(state, PeerState::Connecting | PeerState::AlertingRemoteSide) {
            return Err(JingleError::protocol(format!("session-accept received in state {}", state)));
        }

        let missing_candidates = message.contents.iter().any(|c| !c.has_candidates());
        if missing_candidates {
            let features = self.context.capabilities.cached(&self.remote);
            if self.context.compat.defers_accept_without_candidates(features.as_ref()) {
                info!("{} accepted before sending candidates, waiting for transport-info", self.remote);
                *self.pending_accept.lock() = Some(message);
                return Ok(());
            }
        }

        self.process_accept(message).await
    }

    async fn process_accept(self: &Arc<Self>, message: JingleMessage) -> Result<()> {
        let harvester = self.harvester()?;
        let focus = self.focus_context();

        let processed = async {
            harvester
                .start_connectivity_establishment(&remote_transports(&message.contents))
                .await?;
            harvester.wrapup_connectivity_establishment().await?;

            let mut negotiator = self.negotiator.lock().await;
            let processed = negotiator
                .process_answer(&message.contents, harvester.as_ref(), &focus, true)
                .await;
            self.publish(&negotiator);
            processed
        }
        .await;

        if let Err(e) = processed {
            self.fail(TerminateReason::IncompatibleParameters, e.reason_text()).await;
            return Err(e);
        }

        if let Err(e) = self.start_streams(harvester.as_ref()).await {
            self.fail(TerminateReason::GeneralError, e.reason_text()).await;
            return Err(e);
        }

        self.transition(PeerState::Connected, None).await;
        Ok(())
    }

    async fn handle_terminate(self: &Arc<Self>, message: JingleMessage) {
        // The remote side already ended the session
        self.terminate_sent.store(true, Ordering::SeqCst);

        let (new_state, text) = match &message.reason {
            Some(reason) => {
                let state = match reason.condition {
                    TerminateReason::Busy => PeerState::Busy,
                    TerminateReason::Success | TerminateReason::Cancel => PeerState::Disconnected,
                    _ => PeerState::Failed,
                };
                let mut text = format!("Call ended by remote side. Reason: {}.", reason.condition);
                if let Some(detail) = &reason.text {
                    text.push(' ');
                    text.push_str(detail);
                }
                (state, Some(text))
            }
            None => (PeerState::Disconnected, None),
        };

        self.transition(new_state, text).await;
    }

    /// End the call. The message sent depends on how far the call got;
    /// nothing is sent before a session id exists or once terminated.
    pub async fn hangup(self: &Arc<Self>, reason: Option<String>) -> Result<()> {
        let state = self.state();
        if state.is_terminal() {
            debug!("Hangup of {} ignored in state {}", self.remote, state);
            return Ok(());
        }

        // Before the initiate is out the placing task owns the terminate
        let has_sid = {
            let mut session = self.session.lock();
            if session.sid.is_none() || session.initiating {
                session.cancelled = true;
            }
            session.sid.is_some() && !session.cancelled
        };

        if has_sid {
            match state {
                PeerState::Connected | PeerState::OnHold => {
                    self.send_terminate(TerminateReason::Success, reason.clone()).await
                }
                PeerState::InitiatingCall | PeerState::Connecting | PeerState::AlertingRemoteSide => {
                    self.send_terminate(TerminateReason::Cancel, reason.clone()).await
                }
                PeerState::IncomingCall => self.send_terminate(TerminateReason::Busy, reason.clone()).await,
                _ => {}
            }
        }

        self.transition(PeerState::Disconnected, reason).await;
        Ok(())
    }

    /// Put the call on hold or take it off hold
    pub async fn put_on_hold(self: &Arc<Self>, on_hold: bool) -> Result<()> {
        let state = self.state();
        if !state.is_established() {
            return Err(JingleError::invalid_state(format!("cannot change hold in state {}", state)));
        }
        let harvester = self.harvester()?;
        let focus = self.focus_context();

        let remotely_held = {
            let mut negotiator = self.negotiator.lock().await;
            negotiator.set_locally_on_hold(on_hold, &focus).await?;
            if !on_hold && !negotiator.is_remotely_on_hold() {
                negotiator.reinit_all_contents(harvester.as_ref(), &focus).await?;
            }
            self.publish(&negotiator);
            negotiator.is_remotely_on_hold()
        };

        let info = if on_hold { SessionInfo::Hold } else { SessionInfo::Unhold };
        let sid = self.require_sid()?;
        self.send(JingleMessage::session_info(sid, info)).await?;

        let next = if on_hold || remotely_held {
            PeerState::OnHold
        } else {
            PeerState::Connected
        };
        self.transition(next, None).await;
        Ok(())
    }

    async fn handle_session_info(self: &Arc<Self>, message: JingleMessage) -> Result<()> {
        let Some(info) = message.info else {
            debug!("Empty session-info from {}", self.remote);
            return Ok(());
        };

        match info {
            SessionInfo::Ringing => {
                if self.state() == PeerState::Connecting {
                    self.transition(PeerState::AlertingRemoteSide, None).await;
                }
            }
            SessionInfo::Hold | SessionInfo::Unhold | SessionInfo::Active => {
                let on_hold = matches!(info, SessionInfo::Hold);
                let focus = self.focus_context();
                let locally_held = {
                    let mut negotiator = self.negotiator.lock().await;
                    negotiator.set_remotely_on_hold(on_hold, &focus).await?;
                    self.publish(&negotiator);
                    negotiator.is_locally_on_hold()
                };
                if self.state().is_established() {
                    let next = if on_hold || locally_held {
                        PeerState::OnHold
                    } else {
                        PeerState::Connected
                    };
                    self.transition(next, None).await;
                }
            }
            SessionInfo::Transfer(transfer) => self.handle_transfer(transfer).await?,
            SessionInfo::ConferenceFocus(is_focus) => {
                debug!("{} conference focus: {}", self.remote, is_focus);
                self.remote_is_focus.store(is_focus, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    /// The remote side asks us to call `to` instead
    async fn handle_transfer(self: &Arc<Self>, transfer: Transfer) -> Result<()> {
        let (Some(from), Some(to)) = (transfer.from.clone(), transfer.to.clone()) else {
            return Err(JingleError::protocol("transfer without from and to"));
        };
        info!("{} transfers us to {}", from, to);

        if let Err(e) = self.put_on_hold(true).await {
            warn!("Could not hold {} before transfer: {}", self.remote, e);
        }

        self.context.emit(PeerEvent::TransferRequested {
            peer: self.id,
            to: to.clone(),
            attended_sid: transfer.sid.clone(),
        });

        let call = self
            .call()
            .ok_or_else(|| JingleError::internal("peer outlived its call"))?;
        call.place_transfer_call(to, transfer.clone()).await?;

        let reason = if transfer.sid.is_some() {
            "Attended transfer success"
        } else {
            "Unattended transfer success"
        };
        self.hangup(Some(reason.to_string())).await
    }

    /// Ask the remote side to call `to`. With `attended_sid` the remote
    /// side replaces that session of `to` with the new call.
    pub async fn transfer(&self, to: Jid, attended_sid: Option<SessionId>) -> Result<()> {
        if !self.state().is_established() {
            return Err(JingleError::invalid_state("transfer needs an established call"));
        }
        if !self.dialect().supports_session_info() {
            return Err(JingleError::invalid_state(format!(
                "transfer is not available over {}",
                self.protocol()
            )));
        }
        let from = attended_sid.as_ref().map(|_| self.context.signaling.local_jid());
        let transfer = Transfer {
            from,
            to: Some(to),
            sid: attended_sid.map(|sid| sid.0),
        };
        let sid = self.require_sid()?;
        self.send(JingleMessage::session_info(sid, SessionInfo::Transfer(transfer))).await
    }

    /// Tell the remote side whether we act as a conference focus
    pub async fn announce_focus(&self, is_focus: bool) -> Result<()> {
        let sid = self.require_sid()?;
        self.send(JingleMessage::session_info(sid, SessionInfo::ConferenceFocus(is_focus))).await
    }

    async fn handle_content_add(self: &Arc<Self>, message: JingleMessage) -> Result<()> {
        if !self.state().is_established() {
            return Err(JingleError::protocol(format!("content-add received in state {}", self.state())));
        }

        if message.contents.iter().any(|c| !c.has_candidates()) {
            self.deferred.lock().defer(message);
            return Ok(());
        }
        self.process_content_add(message).await
    }

    async fn process_content_add(self: &Arc<Self>, message: JingleMessage) -> Result<()> {
        let harvester = self.harvester()?;
        let focus = self.focus_context();

        let accepted = async {
            let answer = {
                let mut negotiator = self.negotiator.lock().await;
                let answer = negotiator.compute_answer(&message.contents, &focus).await;
                self.publish(&negotiator);
                answer?
            };
            let names: Vec<String> = answer.iter().map(|c| c.name.clone()).collect();

            harvester.start_harvest(&names).await?;
            harvester
                .start_connectivity_establishment(&remote_transports(&message.contents))
                .await?;
            harvester.wrapup_connectivity_establishment().await?;
            let transports = harvester.wrapup().await?;

            let mut negotiator = self.negotiator.lock().await;
            let accepted = negotiator
                .generate_accept(&names, harvester.as_ref(), &transports, &focus)
                .await;
            self.publish(&negotiator);
            accepted
        }
        .await;

        match accepted {
            Ok(contents) => {
                let accept = self.message(JingleAction::ContentAccept)?.with_contents(contents);
                self.send(accept).await?;
                if let Err(e) = self.start_streams(harvester.as_ref()).await {
                    warn!("Failed to start added streams for {}: {}", self.remote, e);
                }
                Ok(())
            }
            Err(e) => {
                warn!("Rejecting content-add from {}: {}", self.remote, e);
                {
                    let mut negotiator = self.negotiator.lock().await;
                    for content in &message.contents {
                        negotiator.remove_content(&content.name, Some(harvester.as_ref())).await;
                    }
                    self.publish(&negotiator);
                }
                let headers = message.contents.iter().map(Content::header).collect();
                let reject = self.message(JingleAction::ContentReject)?.with_contents(headers);
                self.send(reject).await
            }
        }
    }

    async fn handle_content_accept(self: &Arc<Self>, message: JingleMessage) -> Result<()> {
        let harvester = self.harvester()?;
        let focus = self.focus_context();

        let processed = async {
            harvester
                .start_connectivity_establishment(&remote_transports(&message.contents))
                .await?;
            harvester.wrapup_connectivity_establishment().await?;

            let mut negotiator = self.negotiator.lock().await;
            let processed = async {
                negotiator
                    .process_answer(&message.contents, harvester.as_ref(), &focus, false)
                    .await?;
                negotiator.start_streams(harvester.as_ref()).await
            }
            .await;
            self.publish(&negotiator);
            processed
        }
        .await;

        if let Err(e) = processed {
            self.fail(TerminateReason::IncompatibleParameters, e.reason_text()).await;
            return Err(e);
        }
        Ok(())
    }

    async fn handle_content_modify(self: &Arc<Self>, message: JingleMessage) -> Result<()> {
        let Some(content) = message.contents.first() else {
            return Err(JingleError::protocol("content-modify without content"));
        };
        let harvester = self.harvester()?;
        let focus = self.focus_context();
        let modify = content.description.is_some();

        let processed = {
            let mut negotiator = self.negotiator.lock().await;
            let processed = async {
                negotiator
                    .reinit_content(&content.name, content, modify, harvester.as_ref(), &focus)
                    .await?;
                negotiator.start_streams(harvester.as_ref()).await
            }
            .await;
            self.publish(&negotiator);
            processed
        };

        if let Err(e) = processed {
            self.fail(TerminateReason::IncompatibleParameters, e.reason_text()).await;
            return Err(e);
        }
        Ok(())
    }

    /// Dropping the last content does not end the session
    async fn handle_content_remove(self: &Arc<Self>, message: JingleMessage) -> Result<()> {
        let harvester = self.harvester.read().clone();
        let mut negotiator = self.negotiator.lock().await;
        for content in &message.contents {
            info!("{} removed content {}", self.remote, content.name);
            negotiator.remove_content(&content.name, harvester.as_deref()).await;
        }
        self.publish(&negotiator);
        Ok(())
    }

    async fn handle_content_reject(self: &Arc<Self>, message: JingleMessage) -> Result<()> {
        if message.contents.is_empty() {
            self.fail(
                TerminateReason::IncompatibleParameters,
                "Error: content rejected".to_string(),
            )
            .await;
            return Err(JingleError::incompatible("content rejected"));
        }

        let harvester = self.harvester.read().clone();
        let mut negotiator = self.negotiator.lock().await;
        for content in &message.contents {
            info!("{} rejected content {}", self.remote, content.name);
            negotiator.remove_content(&content.name, harvester.as_deref()).await;
        }
        self.publish(&negotiator);
        Ok(())
    }

    async fn open_transport_gate(self: &Arc<Self>) {
        let pending = {
            let mut gate = self.gate.lock();
            gate.open = true;
            std::mem::take(&mut gate.pending)
        };
        for message in pending {
            debug!("Replaying buffered transport-info for {}", message.sid);
            if let Err(e) = self.handle_transport_info(message).await {
                warn!("Buffered transport-info from {} failed: {}", self.remote, e);
            }
        }
    }

    async fn handle_transport_info(self: &Arc<Self>, message: JingleMessage) -> Result<()> {
        {
            let mut gate = self.gate.lock();
            if !gate.open {
                debug!("Buffering transport-info for {} until the initiate completes", message.sid);
                gate.pending.push(message);
                return Ok(());
            }
        }

        let harvester = self.harvester()?;
        if let Err(e) = harvester
            .start_connectivity_establishment(&remote_transports(&message.contents))
            .await
        {
            let e = JingleError::from(e);
            self.fail(TerminateReason::GeneralError, e.reason_text()).await;
            return Err(e);
        }

        if self.state().is_established() {
            let mut negotiator = self.negotiator.lock().await;
            let refreshed = async {
                negotiator.refresh_targets(harvester.as_ref()).await?;
                negotiator.start_streams(harvester.as_ref()).await
            }
            .await;
            self.publish(&negotiator);
            if let Err(e) = refreshed {
                warn!("Could not apply new candidates from {}: {}", self.remote, e);
            }
        }

        let released = self
            .deferred
            .lock()
            .release(&message.sid, message.contents.iter().map(|c| c.name.as_str()));
        for request in released {
            debug!("Retrying deferred content-add from {}", self.remote);
            if let Err(e) = self.process_content_add(request).await {
                warn!("Deferred content-add from {} failed: {}", self.remote, e);
            }
        }

        let accept = self.pending_accept.lock().take();
        if let Some(accept) = accept {
            debug!("Replaying session-accept from {}", self.remote);
            self.process_accept(accept).await?;
        }
        Ok(())
    }

    /// Allow or forbid sending local video, renegotiating the video content
    pub async fn set_local_video_allowed(self: &Arc<Self>, allowed: bool) -> Result<()> {
        if !self.state().is_established() {
            self.negotiator.lock().await.set_local_video_allowed(allowed);
            return Ok(());
        }
        if !self.dialect().supports_content_changes() {
            debug!("{} cannot renegotiate video over {}", self.remote, self.protocol());
            let mut negotiator = self.negotiator.lock().await;
            negotiator.set_local_video_allowed(allowed);
            self.publish(&negotiator);
            return Ok(());
        }
        let harvester = self.harvester()?;
        let focus = self.focus_context();

        let added = {
            let mut negotiator = self.negotiator.lock().await;
            negotiator.set_local_video_allowed(allowed);
            if allowed && negotiator.remote_content_for(MediaType::Video).is_none() {
                let content = negotiator.create_content(MediaType::Video, &focus)?;
                self.publish(&negotiator);
                Some(content)
            } else {
                None
            }
        };
        if let Some(mut content) = added {
            harvester.start_harvest(std::slice::from_ref(&content.name)).await?;
            let transports = harvester.wrapup().await?;
            content.transport = transports.into_iter().find(|t| t.content == content.name);
            let add = self.message(JingleAction::ContentAdd)?.with_contents(vec![content]);
            return self.send(add).await;
        }

        let mut negotiator = self.negotiator.lock().await;
        let local_is_initiator = negotiator.local_is_initiator();

        let outcome = match negotiator.remote_content_for(MediaType::Video).cloned() {
            None => None,
            Some(remote) => {
                let local_role = if local_is_initiator {
                    Senders::Initiator
                } else {
                    Senders::Responder
                };

                if !allowed && remote.senders == Some(local_role) {
                    negotiator.remove_content(&remote.name, Some(harvester.as_ref())).await;
                    Some(self.message(JingleAction::ContentRemove)?.with_contents(vec![remote.header()]))
                } else {
                    let senders = adjust_video_senders(remote.senders, allowed, local_is_initiator);
                    let changed = reconcile_senders_change(remote.senders, senders);

                    let mut header = remote.header();
                    header.senders = Some(senders);
                    negotiator
                        .reinit_content(&remote.name, &header, false, harvester.as_ref(), &focus)
                        .await?;
                    negotiator.start_streams(harvester.as_ref()).await?;

                    match changed {
                        Some(_) => Some(self.message(JingleAction::ContentModify)?.with_contents(vec![header])),
                        None => None,
                    }
                }
            }
        };
        self.publish(&negotiator);
        drop(negotiator);

        if let Some(message) = outcome {
            self.send(message).await?;
        }
        Ok(())
    }

    /// Stop sending and receiving video with this peer
    pub async fn remove_video(self: &Arc<Self>) -> Result<()> {
        let harvester = self.harvester.read().clone();
        let mut negotiator = self.negotiator.lock().await;
        let Some(remote) = negotiator.remote_content_for(MediaType::Video).cloned() else {
            return Ok(());
        };
        negotiator.remove_content(&remote.name, harvester.as_deref()).await;
        self.publish(&negotiator);
        drop(negotiator);

        let remove = self.message(JingleAction::ContentRemove)?.with_contents(vec![remote.header()]);
        self.send(remove).await
    }

    /// Conference-info from a remote focus
    pub fn handle_conference_info(&self, info: ConferenceInfo) -> bool {
        let applied = self.conference.lock().apply(info);
        if applied {
            if let Some(current) = self.received_conference() {
                self.context.emit(PeerEvent::ConferenceInfoReceived {
                    peer: self.id,
                    info: current,
                });
            }
        }
        applied
    }
}

fn remote_transports(contents: &[Content]) -> Vec<TransportDescription> {
    contents.iter().filter_map(|c| c.transport.clone()).collect()
}

fn attach_transports(contents: &mut [Content], transports: Vec<TransportDescription>) {
    for transport in transports {
        if let Some(content) = contents.iter_mut().find(|c| c.name == transport.content) {
            content.transport = Some(transport);
        }
    }
}
