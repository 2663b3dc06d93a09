use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{wait_connectivity, HarvestCore, HarvestState, TransportHarvester};
use crate::agent::{ConnectivityAgent, ConnectivityState, IceAgent, IceRole};
use crate::candidate::{TransportCandidate, TransportDescription, TransportKind};
use crate::config::HarvesterConfig;
use crate::constants::{COMPONENT_RTCP, COMPONENT_RTP};
use crate::error::{Result, TransportError};
use crate::target::{extract_default_target, StreamConnector, StreamTarget};

/// Remote transports that arrived before the agent had their stream
#[derive(Debug, Default)]
struct StreamGate {
    /// Contents whose agent stream exists
    ready: HashSet<String>,
    parked: HashMap<String, Vec<TransportDescription>>,
    /// Set while parked candidates wait for the harvest run to replay them
    replay_pending: bool,
}

/// ice-udp transport on top of a [`ConnectivityAgent`].
///
/// Remote candidates are fed to the agent as they arrive; checks start only
/// once every component of every stream has enough remote candidates.
/// Candidates for a content still being harvested are parked and fed as
/// soon as its stream exists.
pub struct IceUdpHarvester {
    config: HarvesterConfig,
    agent: Arc<dyn ConnectivityAgent>,
    core: Arc<HarvestCore>,
    /// Accepted remote candidates by content
    remote: Arc<Mutex<HashMap<String, Vec<TransportCandidate>>>>,
    gate: Arc<Mutex<StreamGate>>,
}

impl IceUdpHarvester {
    /// Harvester backed by the built-in [`IceAgent`]
    pub fn new(config: HarvesterConfig, role: IceRole) -> Self {
        let agent = IceAgent::new(config.clone(), role);
        Self::with_agent(config, Arc::new(agent))
    }

    /// Harvester backed by any agent implementation
    pub fn with_agent(config: HarvesterConfig, agent: Arc<dyn ConnectivityAgent>) -> Self {
        Self {
            config,
            agent,
            core: Arc::new(HarvestCore::new()),
            remote: Arc::new(Mutex::new(HashMap::new())),
            gate: Arc::new(Mutex::new(StreamGate::default())),
        }
    }

    pub fn agent(&self) -> &Arc<dyn ConnectivityAgent> {
        &self.agent
    }

    /// True when every component of every stream has the configured number
    /// of remote candidates
    async fn every_component_ready(&self) -> bool {
        let counts = self.agent.remote_candidate_counts().await;
        if counts.is_empty() {
            return false;
        }

        let min = self.config.min_remote_candidates_per_component;
        let mut ready = true;
        for (stream, component, count) in counts {
            if count < min {
                debug!("ice-udp: {}/{} has {} of {} remote candidate(s)", stream, component, count, min);
                ready = false;
            }
        }
        ready
    }

    /// Split `remote` into transports the agent can take now; the others are
    /// parked when their content is still being harvested, or dropped.
    fn admit(&self, remote: &[TransportDescription]) -> Vec<TransportDescription> {
        let mut gate = self.gate.lock();
        let mut admitted = Vec::with_capacity(remote.len());
        for description in remote {
            if gate.ready.contains(&description.content) {
                admitted.push(description.clone());
            } else if self.core.is_requested(&description.content) {
                debug!("ice-udp: parking candidates for {} until its stream exists", description.content);
                gate.parked
                    .entry(description.content.clone())
                    .or_default()
                    .push(description.clone());
                gate.replay_pending = true;
            } else {
                debug!("ice-udp: no local stream for {}, skipping its candidates", description.content);
            }
        }
        admitted
    }

    /// Hand the current-generation candidates of `remote` to the agent.
    /// Returns the number of candidates it took.
    async fn feed_agent(&self, remote: &[TransportDescription]) -> usize {
        let mut added = 0;
        for description in remote {

            self.agent
                .set_remote_credentials(&description.content, description.ufrag.clone(), description.pwd.clone())
                .await;

            let mut current = self.core.current_generation_candidates(description);
            // Host first, then reflexive and relayed
            current.sort_by(|a, b| b.candidate_type.type_preference().cmp(&a.candidate_type.type_preference()));

            let mut accepted = Vec::with_capacity(current.len());
            for candidate in current {
                match self.agent.add_remote_candidate(&description.content, candidate.clone()).await {
                    Ok(true) => accepted.push(candidate),
                    Ok(false) => {}
                    Err(e) => warn!("ice-udp: rejected remote candidate {}: {}", candidate, e),
                }
            }
            added += accepted.len();
            self.core.record_accepted(&accepted);
            self.remote
                .lock()
                .entry(description.content.clone())
                .or_default()
                .extend(accepted);
        }
        added
    }

    /// Start checks if none ran yet and every component has candidates
    async fn start_checks_if_ready(&self) -> Result<bool> {
        if !matches!(self.agent.state(), ConnectivityState::Waiting | ConnectivityState::Failed) {
            return Ok(false);
        }
        if !self.every_component_ready().await {
            return Ok(false);
        }

        self.agent.start_connectivity_checks().await?;
        info!("ice-udp: connectivity checks started");
        Ok(true)
    }

    /// Mark `streams` as present in the agent and feed what was parked for
    /// them
    async fn replay_parked(&self, streams: &[String]) {
        let parked: Vec<TransportDescription> = {
            let mut gate = self.gate.lock();
            let mut parked = Vec::new();
            for name in streams {
                gate.ready.insert(name.clone());
                parked.extend(gate.parked.remove(name).unwrap_or_default());
            }
            parked
        };

        if !parked.is_empty() {
            let added = self.feed_agent(&parked).await;
            debug!("ice-udp: replayed {} parked candidate(s)", added);
            if let Err(e) = self.start_checks_if_ready().await {
                warn!("ice-udp: could not start checks for replayed candidates: {}", e);
            }
        }

        let mut gate = self.gate.lock();
        if gate.parked.is_empty() {
            gate.replay_pending = false;
        }
    }
}

#[async_trait]
impl TransportHarvester for IceUdpHarvester {
    fn kind(&self) -> TransportKind {
        TransportKind::IceUdp
    }

    fn harvest_state(&self) -> HarvestState {
        self.core.state()
    }

    fn connectivity_state(&self) -> ConnectivityState {
        self.agent.state()
    }

    fn generation(&self) -> u32 {
        self.core.generation()
    }

    fn increment_generation(&self) -> u32 {
        self.core.increment_generation()
    }

    async fn start_harvest(&self, contents: &[String]) -> Result<()> {
        if self.core.is_closed() {
            return Err(TransportError::Closed);
        }

        let fresh = self.core.request(contents);
        let pending = self.core.unharvested();
        if pending.is_empty() && self.core.state() == HarvestState::Completed {
            debug!("ice-udp: nothing new to harvest");
            return Ok(());
        }
        debug!("ice-udp: harvesting {:?} ({} new)", pending, fresh.len());

        let this = self.clone();
        let generation = self.core.generation();
        let (ufrag, pwd) = self.agent.local_credentials();

        self.core.spawn_harvest(async move {
            let mut descriptions = Vec::with_capacity(pending.len());
            for name in &pending {
                let candidates = this
                    .agent
                    .add_stream(name, &[COMPONENT_RTP, COMPONENT_RTCP], generation)
                    .await?;
                descriptions.push(
                    TransportDescription::new(name.clone(), TransportKind::IceUdp)
                        .with_credentials(ufrag.clone(), pwd.clone())
                        .with_candidates(candidates),
                );
            }
            if !this.core.is_closed() {
                this.replay_parked(&pending).await;
            }
            Ok::<_, TransportError>(descriptions)
        });

        Ok(())
    }

    async fn wrapup(&self) -> Result<Vec<TransportDescription>> {
        if self.core.is_closed() {
            return Err(TransportError::Closed);
        }
        if let Some(cached) = self.core.cached_wrapup() {
            return Ok(cached);
        }

        self.core.wait_harvest(self.config.harvest_timeout()).await?;
        Ok(self.core.store_wrapup())
    }

    async fn start_connectivity_establishment(&self, remote: &[TransportDescription]) -> Result<bool> {
        if self.core.is_closed() {
            return Ok(false);
        }

        match self.agent.state() {
            ConnectivityState::Running | ConnectivityState::Completed => {
                if remote.iter().all(|d| !d.has_candidates()) {
                    return Ok(false);
                }
                // Late trickled candidates; checks are already under way
                let admitted = self.admit(remote);
                let added = self.feed_agent(&admitted).await;
                debug!("ice-udp: added {} candidate(s) to running checks", added);
                return Ok(false);
            }
            ConnectivityState::Terminated => return Ok(false),
            ConnectivityState::Waiting | ConnectivityState::Failed => {}
        }

        let admitted = self.admit(remote);
        self.feed_agent(&admitted).await;
        self.start_checks_if_ready().await
    }

    async fn wrapup_connectivity_establishment(&self) -> Result<()> {
        if self.core.is_closed() {
            return Err(TransportError::Closed);
        }

        // Parked candidates start their checks once the harvest run lands
        let replay_pending = self.gate.lock().replay_pending;
        if replay_pending {
            self.core.wait_harvest(self.config.harvest_timeout()).await?;
        }

        match wait_connectivity(self.agent.subscribe(), self.config.connectivity_timeout()).await? {
            ConnectivityState::Failed => Err(TransportError::connectivity_failed("could not establish connection")),
            ConnectivityState::Terminated => Err(TransportError::Closed),
            _ => Ok(()),
        }
    }

    async fn stream_target(&self, content: &str) -> Option<StreamTarget> {
        let rtp = self.agent.selected_pair(content, COMPONENT_RTP).await;
        if let Some((_, remote_rtp)) = rtp {
            let rtcp = match self.agent.selected_pair(content, COMPONENT_RTCP).await {
                Some((_, remote_rtcp)) => remote_rtcp.address,
                None => SocketAddr::new(remote_rtp.address.ip(), remote_rtp.address.port().wrapping_add(1)),
            };
            return Some(StreamTarget::new(remote_rtp.address, rtcp));
        }

        // No nominated pair yet: fall back to the first accepted candidates
        let generation = self.core.generation();
        let candidates: Vec<TransportCandidate> = self
            .remote
            .lock()
            .get(content)?
            .iter()
            .filter(|c| c.generation == generation)
            .cloned()
            .collect();
        extract_default_target(&TransportDescription::new(content, TransportKind::IceUdp).with_candidates(candidates))
    }

    fn stream_connector(&self, content: &str) -> Option<StreamConnector> {
        let description = self.core.harvested(content)?;
        let rtp = description.first_candidate(COMPONENT_RTP)?.address;
        let rtcp = description.first_candidate(COMPONENT_RTCP)?.address;
        Some(StreamConnector { rtp, rtcp })
    }

    async fn remove_content(&self, content: &str) {
        self.agent.remove_stream(content).await;
        {
            let mut gate = self.gate.lock();
            gate.ready.remove(content);
            gate.parked.remove(content);
        }
        self.remote.lock().remove(content);
        self.core.forget_content(content);
    }

    fn accepted_remote_candidates(&self) -> Vec<TransportCandidate> {
        self.core.accepted_remote()
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    async fn close(&self) {
        if !self.core.mark_closed() {
            return;
        }
        self.agent.close().await;
        {
            let mut gate = self.gate.lock();
            gate.ready.clear();
            gate.parked.clear();
            gate.replay_pending = false;
        }
        self.remote.lock().clear();
        debug!("ice-udp: closed");
    }
}

impl Clone for IceUdpHarvester {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            agent: self.agent.clone(),
            core: self.core.clone(),
            remote: self.remote.clone(),
            gate: self.gate.clone(),
        }
    }
}
