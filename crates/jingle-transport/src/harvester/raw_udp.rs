use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info};

use super::{HarvestCore, HarvestState, TransportHarvester};
use crate::agent::ConnectivityState;
use crate::candidate::{CandidateIdGenerator, TransportCandidate, TransportDescription, TransportKind};
use crate::config::HarvesterConfig;
use crate::constants::{COMPONENT_RTCP, COMPONENT_RTP};
use crate::error::{Result, TransportError};
use crate::target::{extract_default_target, StreamConnector, StreamTarget};

/// Bound RTP/RTCP sockets of one content
struct SocketPair {
    rtp: Arc<UdpSocket>,
    rtcp: Arc<UdpSocket>,
    connector: StreamConnector,
}

/// raw-udp transport: one host candidate per component and no checks.
/// The remote candidates are used as the stream target as soon as they
/// arrive.
pub struct RawUdpHarvester {
    config: HarvesterConfig,
    core: Arc<HarvestCore>,
    sockets: Arc<Mutex<HashMap<String, SocketPair>>>,
    remote: Arc<Mutex<HashMap<String, TransportDescription>>>,
    connectivity_tx: Arc<watch::Sender<ConnectivityState>>,
    ids: Arc<CandidateIdGenerator>,
}

impl RawUdpHarvester {
    pub fn new(config: HarvesterConfig) -> Self {
        let (connectivity_tx, _) = watch::channel(ConnectivityState::Waiting);
        Self {
            config,
            core: Arc::new(HarvestCore::new()),
            sockets: Arc::new(Mutex::new(HashMap::new())),
            remote: Arc::new(Mutex::new(HashMap::new())),
            connectivity_tx: Arc::new(connectivity_tx),
            ids: Arc::new(CandidateIdGenerator::new()),
        }
    }

    async fn bind_pair(config: &HarvesterConfig) -> Result<(UdpSocket, UdpSocket)> {
        if config.port_min == 0 {
            let rtp = UdpSocket::bind(SocketAddr::new(config.bind_address, 0)).await?;
            let rtcp = UdpSocket::bind(SocketAddr::new(config.bind_address, 0)).await?;
            return Ok((rtp, rtcp));
        }

        // RTP on an even port, RTCP right above it
        let start = config.port_min + (config.port_min % 2);
        let mut port = start;
        while port < config.port_max {
            if let Ok(rtp) = UdpSocket::bind(SocketAddr::new(config.bind_address, port)).await {
                if let Ok(rtcp) = UdpSocket::bind(SocketAddr::new(config.bind_address, port + 1)).await {
                    return Ok((rtp, rtcp));
                }
            }
            port = port.saturating_add(2);
        }

        Err(TransportError::harvest_failed(format!(
            "no free RTP/RTCP port pair in {}-{}",
            config.port_min, config.port_max
        )))
    }

    /// The bound RTP and RTCP sockets of `content`, for the media engine
    pub fn sockets(&self, content: &str) -> Option<(Arc<UdpSocket>, Arc<UdpSocket>)> {
        self.sockets
            .lock()
            .get(content)
            .map(|pair| (pair.rtp.clone(), pair.rtcp.clone()))
    }
}

#[async_trait]
impl TransportHarvester for RawUdpHarvester {
    fn kind(&self) -> TransportKind {
        TransportKind::RawUdp
    }

    fn harvest_state(&self) -> HarvestState {
        self.core.state()
    }

    fn connectivity_state(&self) -> ConnectivityState {
        *self.connectivity_tx.borrow()
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
            debug!("raw-udp: nothing new to harvest");
            return Ok(());
        }
        debug!("raw-udp: harvesting {:?} ({} new)", pending, fresh.len());

        let config = self.config.clone();
        let sockets = self.sockets.clone();
        let ids = self.ids.clone();
        let generation = self.core.generation();
        let core = self.core.clone();

        self.core.spawn_harvest(async move {
            let mut descriptions = Vec::with_capacity(pending.len());
            for name in pending {
                let (rtp, rtcp) = Self::bind_pair(&config).await?;
                let rtp_addr = rtp.local_addr()?;
                let rtcp_addr = rtcp.local_addr()?;
                let connector = StreamConnector {
                    rtp: SocketAddr::new(config.candidate_address(rtp_addr.ip()), rtp_addr.port()),
                    rtcp: SocketAddr::new(config.candidate_address(rtcp_addr.ip()), rtcp_addr.port()),
                };

                let candidates = vec![
                    TransportCandidate::host(ids.next_id(), COMPONENT_RTP, connector.rtp, generation),
                    TransportCandidate::host(ids.next_id(), COMPONENT_RTCP, connector.rtcp, generation),
                ];
                if core.is_closed() {
                    return Err(TransportError::Closed);
                }
                sockets.lock().insert(
                    name.clone(),
                    SocketPair {
                        rtp: Arc::new(rtp),
                        rtcp: Arc::new(rtcp),
                        connector,
                    },
                );

                descriptions.push(TransportDescription::new(name, TransportKind::RawUdp).with_candidates(candidates));
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

        let mut accepted_any = false;
        for description in remote {
            let current = self.core.current_generation_candidates(description);
            if current.is_empty() {
                continue;
            }

            self.core.record_accepted(&current);
            let mut stored = description.clone();
            stored.candidates = current;
            self.remote.lock().insert(description.content.clone(), stored);
            accepted_any = true;
        }

        if accepted_any {
            let old = self.connectivity_tx.send_replace(ConnectivityState::Completed);
            if old != ConnectivityState::Completed {
                info!("raw-udp: remote candidates received, connectivity complete");
            }
        }
        Ok(accepted_any)
    }

    async fn wrapup_connectivity_establishment(&self) -> Result<()> {
        if self.core.is_closed() {
            return Err(TransportError::Closed);
        }
        // Nothing to check: a missing remote target is the negotiator's call
        Ok(())
    }

    async fn stream_target(&self, content: &str) -> Option<StreamTarget> {
        self.remote.lock().get(content).and_then(extract_default_target)
    }

    fn stream_connector(&self, content: &str) -> Option<StreamConnector> {
        self.sockets.lock().get(content).map(|pair| pair.connector)
    }

    async fn remove_content(&self, content: &str) {
        if let Some(pair) = self.sockets.lock().remove(content) {
            debug!("raw-udp: released {} / {} for {}", pair.connector.rtp, pair.connector.rtcp, content);
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
        let released = {
            let mut sockets = self.sockets.lock();
            let count = sockets.len();
            sockets.clear();
            count
        };
        self.remote.lock().clear();
        self.connectivity_tx.send_replace(ConnectivityState::Terminated);
        debug!("raw-udp: closed, released {} socket pair(s)", released);
    }
}
