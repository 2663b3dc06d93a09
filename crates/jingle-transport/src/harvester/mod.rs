//! The transport harvester contract and the state shared by its variants.
//!
//! A harvester gathers local candidates for the contents of one session,
//! exchanges them with the remote peer and reports the socket pair every
//! media stream should use. Harvesting runs on a spawned task; `wrapup()`
//! is the only call that waits for it.

mod ice_udp;
mod raw_udp;

pub use ice_udp::IceUdpHarvester;
pub use raw_udp::RawUdpHarvester;

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::agent::ConnectivityState;
use crate::candidate::{TransportCandidate, TransportDescription, TransportKind};
use crate::error::{Result, TransportError};
use crate::target::{StreamConnector, StreamTarget};

/// Progress of local candidate gathering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestState {
    NotStarted,
    Harvesting,
    Completed,
    Failed,
}

impl HarvestState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for HarvestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not-started"),
            Self::Harvesting => write!(f, "harvesting"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Candidate exchange and connectivity establishment for one session
#[async_trait]
pub trait TransportHarvester: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn harvest_state(&self) -> HarvestState;

    fn connectivity_state(&self) -> ConnectivityState;

    /// Current candidate generation
    fn generation(&self) -> u32;

    /// Start a new negotiation round; returns the new generation
    fn increment_generation(&self) -> u32;

    /// Begin gathering for contents not harvested yet. Returns immediately.
    async fn start_harvest(&self, contents: &[String]) -> Result<()>;

    /// Wait for harvesting and return the local transports of every
    /// requested content. Repeated calls within one round return the cached
    /// result.
    async fn wrapup(&self) -> Result<Vec<TransportDescription>>;

    /// Feed remote candidates. Returns true when connectivity checks were
    /// started by this call.
    async fn start_connectivity_establishment(&self, remote: &[TransportDescription]) -> Result<bool>;

    /// Wait for connectivity checks that have been started to conclude
    async fn wrapup_connectivity_establishment(&self) -> Result<()>;

    /// Remote socket pair the stream of `content` should send to
    async fn stream_target(&self, content: &str) -> Option<StreamTarget>;

    /// Local socket pair of `content`
    fn stream_connector(&self, content: &str) -> Option<StreamConnector>;

    async fn remove_content(&self, content: &str);

    /// Every remote candidate accepted for connectivity so far
    fn accepted_remote_candidates(&self) -> Vec<TransportCandidate>;

    fn is_closed(&self) -> bool;

    /// Release all sockets. Safe to call more than once.
    async fn close(&self);
}

/// State common to both harvester variants
pub(crate) struct HarvestCore {
    state_tx: watch::Sender<HarvestState>,
    generation: AtomicU32,
    /// Bumped by every harvest run so a superseded run cannot publish
    epoch: AtomicU64,
    requested: Mutex<Vec<String>>,
    harvested: Mutex<Vec<TransportDescription>>,
    wrapped: Mutex<Option<(u32, Vec<TransportDescription>)>>,
    accepted_remote: Mutex<Vec<TransportCandidate>>,
    task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl HarvestCore {
    pub(crate) fn new() -> Self {
        let (state_tx, _) = watch::channel(HarvestState::NotStarted);
        Self {
            state_tx,
            generation: AtomicU32::new(0),
            epoch: AtomicU64::new(0),
            requested: Mutex::new(Vec::new()),
            harvested: Mutex::new(Vec::new()),
            wrapped: Mutex::new(None),
            accepted_remote: Mutex::new(Vec::new()),
            task: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> HarvestState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: HarvestState) {
        let old = self.state_tx.send_replace(state);
        if old != state {
            debug!("Harvest state changed: {} -> {}", old, state);
        }
    }

    pub(crate) fn generation(&self) -> u32 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn increment_generation(&self) -> u32 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.wrapped.lock().take();
        debug!("Transport generation is now {}", generation);
        generation
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Marks the core closed; returns false if it already was
    pub(crate) fn mark_closed(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.wrapped.lock().take();
        // Wake anyone blocked in wait_harvest on the aborted run
        if self.state() == HarvestState::Harvesting {
            self.set_state(HarvestState::Failed);
        }
        true
    }

    pub(crate) fn is_requested(&self, content: &str) -> bool {
        self.requested.lock().iter().any(|c| c == content)
    }

    /// Record requested contents and return those not harvested yet
    pub(crate) fn request(&self, contents: &[String]) -> Vec<String> {
        let mut requested = self.requested.lock();
        let mut fresh = Vec::new();
        for name in contents {
            if !requested.contains(name) {
                requested.push(name.clone());
                fresh.push(name.clone());
            }
        }
        fresh
    }

    /// Requested contents without a harvested transport, including those
    /// of a superseded run
    pub(crate) fn unharvested(&self) -> Vec<String> {
        let requested = self.requested.lock().clone();
        let harvested = self.harvested.lock();
        requested
            .into_iter()
            .filter(|name| !harvested.iter().any(|d| &d.content == name))
            .collect()
    }

    /// Run `gather` on a task; its output is dropped if the core is closed
    /// or a newer run or generation has started in the meantime.
    pub(crate) fn spawn_harvest<F>(self: &Arc<Self>, gather: F)
    where
        F: Future<Output = Result<Vec<TransportDescription>>> + Send + 'static,
    {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = self.generation();
        self.wrapped.lock().take();
        self.set_state(HarvestState::Harvesting);

        let core = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let outcome = gather.await;

            if core.is_closed()
                || core.epoch.load(Ordering::SeqCst) != epoch
                || core.generation() != generation
            {
                debug!("Discarding stale harvest result (epoch {}, generation {})", epoch, generation);
                return;
            }

            match outcome {
                Ok(descriptions) => {
                    {
                        let mut harvested = core.harvested.lock();
                        for description in descriptions {
                            harvested.retain(|d| d.content != description.content);
                            harvested.push(description);
                        }
                    }
                    core.set_state(HarvestState::Completed);
                }
                Err(e) => {
                    warn!("Candidate harvest failed: {}", e);
                    core.set_state(HarvestState::Failed);
                }
            }
        });

        if let Some(previous) = self.task.lock().replace(handle) {
            // A finished previous run is harmless; an unfinished one has been superseded
            if !previous.is_finished() {
                debug!("Superseding unfinished harvest run");
            }
        }
    }

    /// Block until the current run finishes, bounded by `timeout`
    pub(crate) async fn wait_harvest(&self, timeout: Duration) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if self.state() == HarvestState::NotStarted {
            return Err(TransportError::HarvestNotStarted);
        }

        let mut rx = self.state_tx.subscribe();
        let state = match tokio::time::timeout(timeout, rx.wait_for(|s| s.is_finished())).await {
            Ok(Ok(state)) => *state,
            Ok(Err(_)) => return Err(TransportError::Closed),
            Err(_) => return Err(TransportError::timeout("candidate harvest", timeout)),
        };
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        match state {
            HarvestState::Completed => Ok(()),
            _ => Err(TransportError::harvest_failed("no local candidates could be gathered")),
        }
    }

    pub(crate) fn cached_wrapup(&self) -> Option<Vec<TransportDescription>> {
        let generation = self.generation();
        self.wrapped
            .lock()
            .as_ref()
            .filter(|(g, _)| *g == generation)
            .map(|(_, descriptions)| descriptions.clone())
    }

    /// Harvested transports in request order, cached for this generation
    pub(crate) fn store_wrapup(&self) -> Vec<TransportDescription> {
        let requested = self.requested.lock().clone();
        let harvested = self.harvested.lock();
        let ordered: Vec<TransportDescription> = requested
            .iter()
            .filter_map(|name| harvested.iter().find(|d| &d.content == name).cloned())
            .collect();
        drop(harvested);

        *self.wrapped.lock() = Some((self.generation(), ordered.clone()));
        ordered
    }

    pub(crate) fn harvested(&self, content: &str) -> Option<TransportDescription> {
        self.harvested.lock().iter().find(|d| d.content == content).cloned()
    }

    pub(crate) fn forget_content(&self, content: &str) {
        self.requested.lock().retain(|c| c != content);
        self.harvested.lock().retain(|d| d.content != content);
        self.wrapped.lock().take();
    }

    /// Split remote transports into current-generation candidates; the rest
    /// is dropped with a debug note.
    pub(crate) fn current_generation_candidates(&self, remote: &TransportDescription) -> Vec<TransportCandidate> {
        let generation = self.generation();
        let (current, stale): (Vec<_>, Vec<_>) = remote
            .candidates
            .iter()
            .cloned()
            .partition(|c| c.generation == generation);

        if !stale.is_empty() {
            debug!(
                "Dropping {} candidate(s) for {} not in generation {}",
                stale.len(),
                remote.content,
                generation
            );
        }
        current
    }

    pub(crate) fn record_accepted(&self, candidates: &[TransportCandidate]) {
        self.accepted_remote.lock().extend_from_slice(candidates);
    }

    pub(crate) fn accepted_remote(&self) -> Vec<TransportCandidate> {
        self.accepted_remote.lock().clone()
    }
}

/// Wait for a connectivity watch channel to leave `Running`. A round that
/// never started is returned as is.
pub(crate) async fn wait_connectivity(
    mut rx: watch::Receiver<ConnectivityState>,
    timeout: Duration,
) -> Result<ConnectivityState> {
    if *rx.borrow() != ConnectivityState::Running {
        return Ok(*rx.borrow());
    }

    match tokio::time::timeout(timeout, rx.wait_for(|s| *s != ConnectivityState::Running)).await {
        Ok(Ok(state)) => Ok(*state),
        Ok(Err(_)) => Err(TransportError::Closed),
        Err(_) => Err(TransportError::timeout("connectivity establishment", timeout)),
    }
}
