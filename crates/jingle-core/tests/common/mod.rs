//! In-memory collaborators for engine tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};

use rvoip_jingle_core::conference::ConferenceInfo;
use rvoip_jingle_core::media::HarvesterFactory;
use rvoip_jingle_core::peer::StrictPolicy;
use rvoip_jingle_core::prelude::*;
use rvoip_jingle_core::protocol::GTalkSession;
use rvoip_jingle_core::signaling::{FEATURE_COIN, FEATURE_GTALK_VOICE, FEATURE_JINGLE, FEATURE_JINGLE_RTP};
use rvoip_jingle_core::jingle::{Creator, RtpDescription};
use rvoip_jingle_transport::constants::{COMPONENT_RTCP, COMPONENT_RTP, NS_ICE_UDP, NS_RAW_UDP};
use rvoip_jingle_transport::{
    extract_default_target, ConnectivityState, HarvestState, StreamConnector, StreamTarget, TransportCandidate,
    TransportDescription, TransportError, TransportHarvester, TransportKind,
};

pub const LOCAL: &str = "juliet@capulet.lit/balcony";
pub const ROMEO: &str = "romeo@montague.lit/orchard";
pub const MERCUTIO: &str = "mercutio@montague.lit/street";

pub fn jid(s: &str) -> Jid {
    Jid::new(s)
}

pub fn pcmu() -> PayloadType {
    PayloadType::new(0, "PCMU", 8000)
}

pub fn opus() -> PayloadType {
    PayloadType::new(111, "opus", 48000).with_channels(2)
}

pub fn h264() -> PayloadType {
    PayloadType::new(96, "H264", 90000)
}

pub fn vp8() -> PayloadType {
    PayloadType::new(100, "VP8", 90000)
}

pub fn candidates(content: &str, port: u16, generation: u32) -> TransportDescription {
    let address: SocketAddr = format!("192.0.2.20:{}", port).parse().unwrap();
    let rtcp = SocketAddr::new(address.ip(), port + 1);
    TransportDescription::new(content, TransportKind::RawUdp).with_candidates(vec![
        TransportCandidate::host(format!("{}-rtp", content), COMPONENT_RTP, address, generation),
        TransportCandidate::host(format!("{}-rtcp", content), COMPONENT_RTCP, rtcp, generation),
    ])
}

pub fn offered_content(media: MediaType, formats: Vec<PayloadType>, transport: Option<TransportDescription>) -> Content {
    let mut content = Content::new(media.as_str(), Creator::Initiator)
        .with_senders(Senders::Both)
        .with_description(RtpDescription::new(media, formats));
    content.transport = transport;
    content
}

/// Records everything sent and answers discovery from a table
pub struct RecordingSignaling {
    local: Jid,
    sent: Mutex<Vec<(Jid, Stanza)>>,
    features: Mutex<HashMap<Jid, FeatureSet>>,
    discoveries: AtomicU32,
    discovery_gate: Mutex<Option<Arc<Notify>>>,
    send_gate: Mutex<Option<Arc<Notify>>>,
    held_sends: AtomicU32,
}

impl RecordingSignaling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            local: jid(LOCAL),
            sent: Mutex::new(Vec::new()),
            features: Mutex::new(HashMap::new()),
            discoveries: AtomicU32::new(0),
            discovery_gate: Mutex::new(None),
            send_gate: Mutex::new(None),
            held_sends: AtomicU32::new(0),
        })
    }

    /// Hold every discovery until the returned handle is notified
    pub fn gate_discovery(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.discovery_gate.lock() = Some(gate.clone());
        gate
    }

    /// Hold the next send until the returned handle is notified; the
    /// stanza is recorded once it is let through
    pub fn hold_next_send(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.send_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn held_sends(&self) -> u32 {
        self.held_sends.load(Ordering::SeqCst)
    }

    pub fn discoveries(&self) -> u32 {
        self.discoveries.load(Ordering::SeqCst)
    }

    pub fn raw_udp_features() -> FeatureSet {
        FeatureSet::new([FEATURE_JINGLE, FEATURE_JINGLE_RTP, NS_RAW_UDP, FEATURE_COIN])
    }

    pub fn ice_udp_features() -> FeatureSet {
        FeatureSet::new([FEATURE_JINGLE, FEATURE_JINGLE_RTP, NS_ICE_UDP])
    }

    /// A client that only speaks the legacy Google Talk session protocol
    pub fn gtalk_features() -> FeatureSet {
        FeatureSet::new([FEATURE_GTALK_VOICE])
    }

    pub fn set_features(&self, jid: &Jid, features: FeatureSet) {
        self.features.lock().insert(jid.clone(), features);
    }

    pub fn sent(&self) -> Vec<(Jid, Stanza)> {
        self.sent.lock().clone()
    }

    pub fn jingle(&self) -> Vec<JingleMessage> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(_, s)| s.as_jingle().cloned())
            .collect()
    }

    pub fn actions(&self) -> Vec<JingleAction> {
        self.jingle().iter().map(|m| m.action).collect()
    }

    pub fn count(&self, action: JingleAction) -> usize {
        self.jingle().iter().filter(|m| m.action == action).count()
    }

    pub fn last(&self, action: JingleAction) -> Option<JingleMessage> {
        self.jingle().into_iter().rev().find(|m| m.action == action)
    }

    pub fn gtalk(&self) -> Vec<GTalkSession> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(_, s)| s.as_gtalk().cloned())
            .collect()
    }

    pub fn conference_infos(&self, to: &Jid) -> Vec<ConferenceInfo> {
        self.sent
            .lock()
            .iter()
            .filter(|(j, _)| j == to)
            .filter_map(|(_, s)| match s {
                Stanza::ConferenceInfo(info) => Some(info.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

#[async_trait]
impl SignalingTransport for RecordingSignaling {
    fn local_jid(&self) -> Jid {
        self.local.clone()
    }

    async fn send(&self, to: &Jid, stanza: Stanza) -> anyhow::Result<()> {
        let gate = self.send_gate.lock().take();
        if let Some(gate) = gate {
            self.held_sends.fetch_add(1, Ordering::SeqCst);
            gate.notified().await;
            self.held_sends.fetch_sub(1, Ordering::SeqCst);
        }
        self.sent.lock().push((to.clone(), stanza));
        Ok(())
    }

    async fn discover_features(&self, jid: &Jid) -> anyhow::Result<FeatureSet> {
        self.discoveries.fetch_add(1, Ordering::SeqCst);
        let gate = self.discovery_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.features
            .lock()
            .get(jid)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("item-not-found: {}", jid))
    }
}

#[derive(Debug, Clone)]
pub struct RunningStream {
    pub params: StreamParams,
    pub direction: Direction,
    pub target: StreamTarget,
    pub muted: bool,
}

/// Media engine keeping its streams in a map
pub struct MockMediaEngine {
    devices: Mutex<HashMap<MediaType, MediaDevice>>,
    streams: Mutex<HashMap<StreamId, RunningStream>>,
    stopped: Mutex<Vec<(StreamId, MediaType)>>,
    next_id: AtomicU64,
    fail_start: AtomicBool,
}

impl MockMediaEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
            stopped: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            fail_start: AtomicBool::new(false),
        })
    }

    /// Audio (PCMU, opus) and video (H264, VP8) devices that send and receive
    pub fn audio_video() -> Arc<Self> {
        let engine = Self::new();
        engine.set_device(MediaType::Audio, Direction::SendRecv, vec![opus(), pcmu()]);
        engine.set_device(MediaType::Video, Direction::SendRecv, vec![vp8(), h264()]);
        engine
    }

    pub fn audio_only() -> Arc<Self> {
        let engine = Self::new();
        engine.set_device(MediaType::Audio, Direction::SendRecv, vec![opus(), pcmu()]);
        engine
    }

    pub fn set_device(&self, media: MediaType, direction: Direction, formats: Vec<PayloadType>) {
        self.devices
            .lock()
            .insert(media, MediaDevice::new(media, direction, formats));
    }

    pub fn fail_stream_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    pub fn running(&self) -> Vec<RunningStream> {
        self.streams.lock().values().cloned().collect()
    }

    pub fn running_for(&self, media: MediaType) -> Option<RunningStream> {
        self.streams
            .lock()
            .values()
            .find(|s| s.params.media == media)
            .cloned()
    }

    pub fn stopped(&self) -> Vec<(StreamId, MediaType)> {
        self.stopped.lock().clone()
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    fn default_device(&self, media: MediaType) -> Option<MediaDevice> {
        self.devices.lock().get(&media).cloned()
    }

    async fn open_device(&self, _media: MediaType) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close_device(&self, _media: MediaType) -> anyhow::Result<()> {
        Ok(())
    }

    async fn start_stream(&self, params: StreamParams) -> anyhow::Result<StreamId> {
        if self.fail_start.load(Ordering::SeqCst) {
            anyhow::bail!("device busy");
        }
        let id = StreamId(format!("stream-{}", self.next_id.fetch_add(1, Ordering::SeqCst)));
        self.streams.lock().insert(
            id.clone(),
            RunningStream {
                direction: params.direction,
                target: params.target,
                muted: false,
                params,
            },
        );
        Ok(id)
    }

    async fn update_target(
        &self,
        stream: &StreamId,
        target: StreamTarget,
        _connector: Option<StreamConnector>,
    ) -> anyhow::Result<()> {
        if let Some(running) = self.streams.lock().get_mut(stream) {
            running.target = target;
        }
        Ok(())
    }

    async fn set_direction(&self, stream: &StreamId, direction: Direction) -> anyhow::Result<()> {
        if let Some(running) = self.streams.lock().get_mut(stream) {
            running.direction = direction;
        }
        Ok(())
    }

    async fn set_mute(&self, stream: &StreamId, mute: bool) -> anyhow::Result<()> {
        if let Some(running) = self.streams.lock().get_mut(stream) {
            running.muted = mute;
        }
        Ok(())
    }

    async fn stop_stream(&self, stream: &StreamId) -> anyhow::Result<()> {
        if let Some(running) = self.streams.lock().remove(stream) {
            self.stopped.lock().push((stream.clone(), running.params.media));
        }
        Ok(())
    }

    fn active_stream(&self, owner: &SessionId, media: MediaType) -> Option<StreamId> {
        self.streams
            .lock()
            .iter()
            .find(|(_, s)| &s.params.owner == owner && s.params.media == media)
            .map(|(id, _)| id.clone())
    }

    fn local_source_id(&self, stream: &StreamId) -> Option<u32> {
        stream.0.trim_start_matches("stream-").parse().ok()
    }
}

/// Harvester that hands out fixed loopback candidates and records the
/// remote ones, without sockets
pub struct ScriptedHarvester {
    generation: AtomicU32,
    state: Mutex<HarvestState>,
    requested: Mutex<Vec<String>>,
    remote: Mutex<HashMap<String, Vec<TransportCandidate>>>,
    accepted: Mutex<Vec<TransportCandidate>>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
    fail_connectivity: AtomicBool,
    stall_harvest: AtomicBool,
    stall_connectivity: AtomicBool,
    stalled: AtomicU32,
    wrapups: AtomicU32,
}

impl ScriptedHarvester {
    pub fn new() -> Self {
        Self {
            generation: AtomicU32::new(0),
            state: Mutex::new(HarvestState::NotStarted),
            requested: Mutex::new(Vec::new()),
            remote: Mutex::new(HashMap::new()),
            accepted: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            closed_tx: watch::channel(false).0,
            fail_connectivity: AtomicBool::new(false),
            stall_harvest: AtomicBool::new(false),
            stall_connectivity: AtomicBool::new(false),
            stalled: AtomicU32::new(0),
            wrapups: AtomicU32::new(0),
        }
    }

    pub fn fail_connectivity(&self) {
        self.fail_connectivity.store(true, Ordering::SeqCst);
    }

    /// `wrapup()` blocks until the harvester is closed
    pub fn stall_harvest(&self) {
        self.stall_harvest.store(true, Ordering::SeqCst);
    }

    /// `wrapup_connectivity_establishment()` blocks until the harvester is
    /// closed
    pub fn stall_connectivity(&self) {
        self.stall_connectivity.store(true, Ordering::SeqCst);
    }

    /// Calls currently blocked by a stall
    pub fn stalled(&self) -> u32 {
        self.stalled.load(Ordering::SeqCst)
    }

    async fn stall_until_closed(&self, stall: &AtomicBool) {
        if !stall.load(Ordering::SeqCst) {
            return;
        }
        let mut closed = self.closed_tx.subscribe();
        self.stalled.fetch_add(1, Ordering::SeqCst);
        let _ = closed.wait_for(|closed| *closed).await;
        self.stalled.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn remote_for(&self, content: &str) -> Vec<TransportCandidate> {
        self.remote.lock().get(content).cloned().unwrap_or_default()
    }

    fn local_port(&self, content: &str) -> u16 {
        match content {
            "audio" => 20000,
            "video" => 20002,
            _ => 20004,
        }
    }
}

#[async_trait]
impl TransportHarvester for ScriptedHarvester {
    fn kind(&self) -> TransportKind {
        TransportKind::RawUdp
    }

    fn harvest_state(&self) -> HarvestState {
        *self.state.lock()
    }

    fn connectivity_state(&self) -> ConnectivityState {
        if self.closed.load(Ordering::SeqCst) {
            ConnectivityState::Terminated
        } else {
            ConnectivityState::Completed
        }
    }

    fn generation(&self) -> u32 {
        self.generation.load(Ordering::SeqCst)
    }

    fn increment_generation(&self) -> u32 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn start_harvest(&self, contents: &[String]) -> rvoip_jingle_transport::Result<()> {
        let mut requested = self.requested.lock();
        for content in contents {
            if !requested.contains(content) {
                requested.push(content.clone());
            }
        }
        *self.state.lock() = HarvestState::Completed;
        Ok(())
    }

    async fn wrapup(&self) -> rvoip_jingle_transport::Result<Vec<TransportDescription>> {
        self.stall_until_closed(&self.stall_harvest).await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.wrapups.fetch_add(1, Ordering::SeqCst);
        let generation = self.generation();
        Ok(self
            .requested
            .lock()
            .iter()
            .map(|content| {
                let address: SocketAddr = format!("127.0.0.1:{}", self.local_port(content)).parse().unwrap();
                TransportDescription::new(content.clone(), TransportKind::RawUdp).with_candidates(vec![
                    TransportCandidate::host(format!("{}-1", content), COMPONENT_RTP, address, generation),
                ])
            })
            .collect())
    }

    async fn start_connectivity_establishment(
        &self,
        remote: &[TransportDescription],
    ) -> rvoip_jingle_transport::Result<bool> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let generation = self.generation();
        for transport in remote {
            let current: Vec<TransportCandidate> = transport
                .candidates
                .iter()
                .filter(|c| c.generation == generation)
                .cloned()
                .collect();
            self.accepted.lock().extend(current.iter().cloned());
            self.remote
                .lock()
                .entry(transport.content.clone())
                .or_default()
                .extend(current);
        }
        Ok(false)
    }

    async fn wrapup_connectivity_establishment(&self) -> rvoip_jingle_transport::Result<()> {
        self.stall_until_closed(&self.stall_connectivity).await;
        if self.fail_connectivity.load(Ordering::SeqCst) {
            return Err(TransportError::connectivity_failed("all pairs failed"));
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    async fn stream_target(&self, content: &str) -> Option<StreamTarget> {
        let candidates = self.remote.lock().get(content).cloned()?;
        let transport = TransportDescription::new(content, TransportKind::RawUdp).with_candidates(candidates);
        extract_default_target(&transport)
    }

    fn stream_connector(&self, content: &str) -> Option<StreamConnector> {
        let rtp: SocketAddr = format!("127.0.0.1:{}", self.local_port(content)).parse().ok()?;
        Some(StreamConnector {
            rtp,
            rtcp: SocketAddr::new(rtp.ip(), rtp.port() + 1),
        })
    }

    async fn remove_content(&self, content: &str) {
        self.requested.lock().retain(|c| c != content);
        self.remote.lock().remove(content);
    }

    fn accepted_remote_candidates(&self) -> Vec<TransportCandidate> {
        self.accepted.lock().clone()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.closed_tx.send_replace(true);
    }
}

/// Hands out scripted harvesters and keeps them for inspection
#[derive(Default)]
pub struct ScriptedHarvesterFactory {
    created: Mutex<Vec<Arc<ScriptedHarvester>>>,
    fail_connectivity: AtomicBool,
    stall_harvest: AtomicBool,
    stall_connectivity: AtomicBool,
}

impl ScriptedHarvesterFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_connectivity() -> Arc<Self> {
        let factory = Self::default();
        factory.fail_connectivity.store(true, Ordering::SeqCst);
        Arc::new(factory)
    }

    /// Every harvester blocks in `wrapup()` until closed
    pub fn stalling_harvest() -> Arc<Self> {
        let factory = Self::default();
        factory.stall_harvest.store(true, Ordering::SeqCst);
        Arc::new(factory)
    }

    /// Every harvester blocks in `wrapup_connectivity_establishment()` until
    /// closed
    pub fn stalling_connectivity() -> Arc<Self> {
        let factory = Self::default();
        factory.stall_connectivity.store(true, Ordering::SeqCst);
        Arc::new(factory)
    }

    pub fn created(&self) -> Vec<Arc<ScriptedHarvester>> {
        self.created.lock().clone()
    }

    pub fn last(&self) -> Arc<ScriptedHarvester> {
        self.created.lock().last().cloned().expect("no harvester created")
    }
}

impl HarvesterFactory for ScriptedHarvesterFactory {
    fn create(&self, _kind: TransportKind, _local_is_initiator: bool) -> Arc<dyn TransportHarvester> {
        let harvester = Arc::new(ScriptedHarvester::new());
        if self.fail_connectivity.load(Ordering::SeqCst) {
            harvester.fail_connectivity();
        }
        if self.stall_harvest.load(Ordering::SeqCst) {
            harvester.stall_harvest();
        }
        if self.stall_connectivity.load(Ordering::SeqCst) {
            harvester.stall_connectivity();
        }
        self.created.lock().push(harvester.clone());
        harvester
    }
}

/// Engine wired to the in-memory collaborators
pub struct Harness {
    pub manager: CallManager,
    pub signaling: Arc<RecordingSignaling>,
    pub media: Arc<MockMediaEngine>,
    pub harvesters: Arc<ScriptedHarvesterFactory>,
}

impl Harness {
    pub fn new(config: JingleConfig, media: Arc<MockMediaEngine>) -> Self {
        Self::with_harvesters(config, media, ScriptedHarvesterFactory::new())
    }

    pub fn with_harvesters(
        config: JingleConfig,
        media: Arc<MockMediaEngine>,
        harvesters: Arc<ScriptedHarvesterFactory>,
    ) -> Self {
        let signaling = RecordingSignaling::new();
        for remote in [ROMEO, MERCUTIO] {
            signaling.set_features(&jid(remote), RecordingSignaling::raw_udp_features());
        }
        let manager = CallManager::with_collaborators(
            config,
            signaling.clone(),
            media.clone(),
            harvesters.clone(),
            Arc::new(StrictPolicy),
        )
        .expect("valid configuration");

        Self {
            manager,
            signaling,
            media,
            harvesters,
        }
    }

    /// Deliver an inbound message from `from`
    pub async fn deliver(&self, from: &str, message: JingleMessage) -> Result<()> {
        self.manager.handle_inbound(&jid(from), message).await
    }

    /// Deliver an inbound Google Talk session message from `from`
    pub async fn deliver_gtalk(&self, from: &str, session: GTalkSession) -> Result<()> {
        self.manager.handle_inbound_gtalk(&jid(from), session).await
    }

    /// Audio offer from `from` with raw candidates on `port`
    pub fn audio_offer(from: &str, sid: &str, port: u16) -> JingleMessage {
        JingleMessage::new(JingleAction::SessionInitiate, SessionId::from(sid))
            .with_initiator(jid(from))
            .with_contents(vec![offered_content(
                MediaType::Audio,
                vec![pcmu()],
                Some(candidates("audio", port, 0)),
            )])
    }

    /// Incoming audio call from `from`, answered
    pub async fn answered_call(&self, from: &str, sid: &str) -> Arc<CallPeer> {
        let offer = JingleMessage::new(JingleAction::SessionInitiate, SessionId::from(sid))
            .with_initiator(jid(from))
            .with_contents(vec![offered_content(
                MediaType::Audio,
                vec![pcmu()],
                Some(candidates("audio", 30000, 0)),
            )]);
        self.deliver(from, offer).await.expect("offer accepted");
        let peer = self
            .manager
            .peer_by_session(&SessionId::from(sid))
            .expect("session registered");
        peer.answer().await.expect("answer succeeds");
        peer
    }
}
