use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, trace, warn};

use crate::candidate::{CandidateIdGenerator, TransportCandidate};
use crate::config::HarvesterConfig;
use crate::error::{Result, TransportError};

/// Connectivity establishment state of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    /// Checks not started yet
    Waiting,

    /// Checks in progress
    Running,

    /// Every component has a nominated pair
    Completed,

    /// At least one component has no usable pair
    Failed,

    /// Agent closed
    Terminated,
}

impl ConnectivityState {
    /// Completed, Failed and Terminated end a connectivity round
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Terminated)
    }
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// ICE role; the session initiator is controlling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceRole {
    Controlling,
    Controlled,
}

/// The ICE library seam used by the ice-udp harvester
#[async_trait]
pub trait ConnectivityAgent: Send + Sync {
    fn role(&self) -> IceRole;

    /// Local ufrag and password
    fn local_credentials(&self) -> (String, String);

    /// Create a media stream and gather its local candidates
    async fn add_stream(&self, name: &str, components: &[u16], generation: u32) -> Result<Vec<TransportCandidate>>;

    async fn remove_stream(&self, name: &str);

    async fn set_remote_credentials(&self, stream: &str, ufrag: Option<String>, pwd: Option<String>);

    /// Returns false when the candidate was already known
    async fn add_remote_candidate(&self, stream: &str, candidate: TransportCandidate) -> Result<bool>;

    /// (stream, component, remote candidate count) for every local component
    async fn remote_candidate_counts(&self) -> Vec<(String, u16, usize)>;

    /// Begin checks; the outcome is published through [`ConnectivityAgent::subscribe`]
    async fn start_connectivity_checks(&self) -> Result<()>;

    fn state(&self) -> ConnectivityState;

    fn subscribe(&self) -> watch::Receiver<ConnectivityState>;

    /// Nominated (local, remote) pair of a component
    async fn selected_pair(&self, stream: &str, component: u16) -> Option<(TransportCandidate, TransportCandidate)>;

    /// Release sockets and move to `Terminated`
    async fn close(&self);
}

/// Candidate pair state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidatePairState {
    /// Not checked yet
    Frozen,

    /// Check succeeded
    Succeeded,
}

/// Candidate pair for connectivity checks
#[derive(Debug, Clone)]
struct CandidatePair {
    local: TransportCandidate,
    remote: TransportCandidate,
    priority: u64,
    state: CandidatePairState,
    nominated: bool,
    last_checked: Option<Instant>,
}

impl CandidatePair {
    fn new(local: TransportCandidate, remote: TransportCandidate, role: IceRole) -> Self {
        // RFC 8445 6.1.2.3: G is the controlling agent's candidate priority
        let (g, d) = match role {
            IceRole::Controlling => (local.priority as u64, remote.priority as u64),
            IceRole::Controlled => (remote.priority as u64, local.priority as u64),
        };
        let priority = (1u64 << 32) * g.min(d) + 2 * g.max(d) + u64::from(g > d);

        Self {
            local,
            remote,
            priority,
            state: CandidatePairState::Frozen,
            nominated: false,
            last_checked: None,
        }
    }

    fn is_compatible(&self) -> bool {
        self.local.protocol == self.remote.protocol
            && self.local.address.is_ipv4() == self.remote.address.is_ipv4()
    }
}

/// Per-content state inside the agent
#[derive(Debug, Default)]
struct IceStream {
    components: Vec<u16>,
    local: Vec<TransportCandidate>,
    remote: Vec<TransportCandidate>,
    pairs: Vec<CandidatePair>,
    selected: HashMap<u16, (TransportCandidate, TransportCandidate)>,
    sockets: Vec<Arc<UdpSocket>>,
    remote_ufrag: Option<String>,
    remote_pwd: Option<String>,
}

/// Built-in agent: gathers host candidates on UDP sockets and nominates the
/// highest priority compatible pair of every component.
pub struct IceAgent {
    /// Socket binding and timeouts
    config: HarvesterConfig,

    /// Agent role (controlling or controlled)
    role: IceRole,

    /// Local username fragment
    ufrag: String,

    /// Local password
    pwd: String,

    /// Current state, observable by any number of waiters
    state_tx: Arc<watch::Sender<ConnectivityState>>,

    /// Streams by content name
    streams: Arc<RwLock<HashMap<String, IceStream>>>,

    /// Candidate ids scoped to this agent
    ids: Arc<CandidateIdGenerator>,
}

impl IceAgent {
    /// Create a new agent
    pub fn new(config: HarvesterConfig, role: IceRole) -> Self {
        debug!("Creating ICE agent with role {:?}", role);

        let (state_tx, _) = watch::channel(ConnectivityState::Waiting);

        Self {
            config,
            role,
            ufrag: random_token(8),
            pwd: random_token(24),
            state_tx: Arc::new(state_tx),
            streams: Arc::new(RwLock::new(HashMap::new())),
            ids: Arc::new(CandidateIdGenerator::new()),
        }
    }

    /// Terminated is sticky: a late check task cannot revive a closed agent
    fn set_state(&self, new_state: ConnectivityState) {
        let mut old_state = new_state;
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == ConnectivityState::Terminated || *state == new_state {
                return false;
            }
            old_state = *state;
            *state = new_state;
            true
        });

        if changed {
            debug!("ICE agent state changed: {} -> {}", old_state, new_state);
        }
    }

    async fn gather_host_candidate(&self, component: u16, generation: u32) -> Result<(TransportCandidate, Arc<UdpSocket>)> {
        let socket = UdpSocket::bind(SocketAddr::new(self.config.bind_address, 0)).await?;
        let bound = socket.local_addr()?;
        let address = SocketAddr::new(self.config.candidate_address(bound.ip()), bound.port());
        let candidate = TransportCandidate::host(self.ids.next_id(), component, address, generation);

        trace!("Gathered host candidate {}", candidate);
        Ok((candidate, Arc::new(socket)))
    }

    /// Nominate the best pair of every component of every stream
    async fn check_candidate_pairs(&self) {
        debug!("Running connectivity checks");

        let mut all_nominated = true;
        {
            let mut streams = self.streams.write().await;
            for (name, stream) in streams.iter_mut() {
                stream.selected.clear();
                for component in stream.components.clone() {
                    let best = stream
                        .pairs
                        .iter_mut()
                        .filter(|p| p.local.component == component && p.is_compatible())
                        .max_by_key(|p| p.priority);

                    match best {
                        Some(pair) => {
                            pair.state = CandidatePairState::Succeeded;
                            pair.nominated = true;
                            pair.last_checked = Some(Instant::now());
                            debug!(
                                "Nominated {} <-> {} for {}/{}",
                                pair.local.address, pair.remote.address, name, component
                            );
                            stream.selected.insert(component, (pair.local.clone(), pair.remote.clone()));
                        }
                        None => {
                            warn!("No candidate pair for {}/{}", name, component);
                            all_nominated = false;
                        }
                    }
                }
            }
        }

        if all_nominated {
            info!("ICE connectivity established");
            self.set_state(ConnectivityState::Completed);
        } else {
            self.set_state(ConnectivityState::Failed);
        }
    }
}

#[async_trait]
impl ConnectivityAgent for IceAgent {
    fn role(&self) -> IceRole {
        self.role
    }

    fn local_credentials(&self) -> (String, String) {
        (self.ufrag.clone(), self.pwd.clone())
    }

    async fn add_stream(&self, name: &str, components: &[u16], generation: u32) -> Result<Vec<TransportCandidate>> {
        if self.state() == ConnectivityState::Terminated {
            return Err(TransportError::Closed);
        }

        let mut gathered = Vec::with_capacity(components.len());
        let mut sockets = Vec::with_capacity(components.len());
        for &component in components {
            let (candidate, socket) = self.gather_host_candidate(component, generation).await?;
            gathered.push(candidate);
            sockets.push(socket);
        }

        let mut streams = self.streams.write().await;
        let stream = streams.entry(name.to_string()).or_default();
        stream.components = components.to_vec();
        stream.local = gathered.clone();
        stream.sockets = sockets;

        // Candidates that arrived before the stream existed get paired now
        let role = self.role;
        stream.pairs = stream
            .local
            .iter()
            .flat_map(|l| {
                stream
                    .remote
                    .iter()
                    .filter(move |r| r.component == l.component)
                    .map(move |r| CandidatePair::new(l.clone(), r.clone(), role))
            })
            .collect();

        debug!("Added ICE stream {} with {} local candidates", name, gathered.len());
        Ok(gathered)
    }

    async fn remove_stream(&self, name: &str) {
        if self.streams.write().await.remove(name).is_some() {
            debug!("Removed ICE stream {}", name);
        }
    }

    async fn set_remote_credentials(&self, stream: &str, ufrag: Option<String>, pwd: Option<String>) {
        if let Some(stream) = self.streams.write().await.get_mut(stream) {
            if ufrag.is_some() {
                stream.remote_ufrag = ufrag;
            }
            if pwd.is_some() {
                stream.remote_pwd = pwd;
            }
        }
    }

    async fn add_remote_candidate(&self, stream: &str, candidate: TransportCandidate) -> Result<bool> {
        let mut streams = self.streams.write().await;
        let stream = streams
            .get_mut(stream)
            .ok_or_else(|| TransportError::UnknownContent { name: stream.to_string() })?;

        if stream
            .remote
            .iter()
            .any(|c| c.address == candidate.address && c.component == candidate.component && c.protocol == candidate.protocol)
        {
            debug!("Ignoring duplicate remote candidate {}", candidate);
            return Ok(false);
        }

        debug!("Adding remote candidate: {}", candidate);
        let new_pairs: Vec<CandidatePair> = stream
            .local
            .iter()
            .filter(|l| l.component == candidate.component)
            .map(|l| CandidatePair::new(l.clone(), candidate.clone(), self.role))
            .collect();

        stream.remote.push(candidate);
        stream.pairs.extend(new_pairs);
        stream.pairs.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(true)
    }

    async fn remote_candidate_counts(&self) -> Vec<(String, u16, usize)> {
        let streams = self.streams.read().await;
        let mut counts = Vec::new();
        for (name, stream) in streams.iter() {
            for &component in &stream.components {
                let count = stream.remote.iter().filter(|c| c.component == component).count();
                counts.push((name.clone(), component, count));
            }
        }
        counts
    }

    async fn start_connectivity_checks(&self) -> Result<()> {
        match self.state() {
            ConnectivityState::Terminated => return Err(TransportError::Closed),
            ConnectivityState::Running => {
                debug!("Connectivity checks already running");
                return Ok(());
            }
            _ => {}
        }

        self.set_state(ConnectivityState::Running);

        let agent = self.clone();
        tokio::spawn(async move {
            agent.check_candidate_pairs().await;
        });

        Ok(())
    }

    fn state(&self) -> ConnectivityState {
        *self.state_tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state_tx.subscribe()
    }

    async fn selected_pair(&self, stream: &str, component: u16) -> Option<(TransportCandidate, TransportCandidate)> {
        self.streams
            .read()
            .await
            .get(stream)
            .and_then(|s| s.selected.get(&component).cloned())
    }

    async fn close(&self) {
        debug!("Closing ICE agent");

        self.set_state(ConnectivityState::Terminated);
        self.streams.write().await.clear();
    }
}

impl Clone for IceAgent {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            role: self.role,
            ufrag: self.ufrag.clone(),
            pwd: self.pwd.clone(),
            state_tx: self.state_tx.clone(),
            streams: self.streams.clone(),
            ids: self.ids.clone(),
        }
    }
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{COMPONENT_RTCP, COMPONENT_RTP};

    fn loopback_config() -> HarvesterConfig {
        HarvesterConfig::builder()
            .bind_address("127.0.0.1".parse().unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn pair_priority_favours_controlling_side() {
        let local = TransportCandidate::host("l", COMPONENT_RTP, "10.0.0.1:5000".parse().unwrap(), 0);
        let mut remote = TransportCandidate::host("r", COMPONENT_RTP, "10.0.0.2:5000".parse().unwrap(), 0);
        remote.priority -= 10;

        let controlling = CandidatePair::new(local.clone(), remote.clone(), IceRole::Controlling);
        let controlled = CandidatePair::new(local, remote, IceRole::Controlled);
        assert_eq!(controlling.priority, controlled.priority + 1);
    }

    #[tokio::test]
    async fn checks_complete_when_every_component_pairs() {
        let agent = IceAgent::new(loopback_config(), IceRole::Controlling);
        let local = agent
            .add_stream("audio", &[COMPONENT_RTP, COMPONENT_RTCP], 0)
            .await
            .expect("gather");
        assert_eq!(local.len(), 2);

        for (component, port) in [(COMPONENT_RTP, 7000), (COMPONENT_RTCP, 7001)] {
            let remote = TransportCandidate::host("x", component, SocketAddr::from(([127, 0, 0, 1], port)), 0);
            assert!(agent.add_remote_candidate("audio", remote).await.unwrap());
        }

        let mut rx = agent.subscribe();
        agent.start_connectivity_checks().await.unwrap();
        let state = *rx.wait_for(|s| s.is_terminal()).await.unwrap();
        assert_eq!(state, ConnectivityState::Completed);

        let (_, remote) = agent.selected_pair("audio", COMPONENT_RTP).await.expect("selected");
        assert_eq!(remote.address.port(), 7000);
    }

    #[tokio::test]
    async fn checks_fail_without_remote_candidates() {
        let agent = IceAgent::new(loopback_config(), IceRole::Controlled);
        agent.add_stream("audio", &[COMPONENT_RTP], 0).await.unwrap();

        let mut rx = agent.subscribe();
        agent.start_connectivity_checks().await.unwrap();
        let state = *rx.wait_for(|s| s.is_terminal()).await.unwrap();
        assert_eq!(state, ConnectivityState::Failed);
    }

    #[tokio::test]
    async fn closed_agent_stays_terminated() {
        let agent = IceAgent::new(loopback_config(), IceRole::Controlling);
        agent.close().await;
        assert_eq!(agent.state(), ConnectivityState::Terminated);
        assert!(agent.start_connectivity_checks().await.is_err());
        assert!(agent.add_stream("audio", &[COMPONENT_RTP], 0).await.is_err());
    }
}
