//! Harvester behaviour: wrapup caching, generation filtering, the ICE start
//! threshold and shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::watch;

use rvoip_jingle_transport::constants::{COMPONENT_RTCP, COMPONENT_RTP};
use rvoip_jingle_transport::prelude::*;
use rvoip_jingle_transport::TransportError;

fn contents(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn loopback_config() -> HarvesterConfig {
    HarvesterConfig::builder()
        .bind_address("127.0.0.1".parse().unwrap())
        .build()
        .unwrap()
}

fn remote_transport(content: &str, kind: TransportKind, base_port: u16, generation: u32) -> TransportDescription {
    let rtp = TransportCandidate::host("r1", COMPONENT_RTP, format!("192.0.2.10:{}", base_port).parse().unwrap(), generation);
    let rtcp = TransportCandidate::host("r2", COMPONENT_RTCP, format!("192.0.2.10:{}", base_port + 1).parse().unwrap(), generation);
    TransportDescription::new(content, kind).with_candidates(vec![rtp, rtcp])
}

/// Agent that records what it is fed and completes checks on request
struct ScriptedAgent {
    state_tx: watch::Sender<ConnectivityState>,
    streams: Mutex<HashMap<String, Vec<TransportCandidate>>>,
    outcome: ConnectivityState,
    checks_started: Mutex<u32>,
    gather_delay: Duration,
}

impl ScriptedAgent {
    fn new(outcome: ConnectivityState) -> Arc<Self> {
        Self::slow(outcome, Duration::ZERO)
    }

    /// Every `add_stream` takes `gather_delay`
    fn slow(outcome: ConnectivityState, gather_delay: Duration) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectivityState::Waiting);
        Arc::new(Self {
            state_tx,
            streams: Mutex::new(HashMap::new()),
            outcome,
            checks_started: Mutex::new(0),
            gather_delay,
        })
    }

    fn finish_checks(&self) {
        self.state_tx.send_replace(self.outcome);
    }
}

#[async_trait]
impl ConnectivityAgent for ScriptedAgent {
    fn role(&self) -> IceRole {
        IceRole::Controlling
    }

    fn local_credentials(&self) -> (String, String) {
        ("ufrag".to_string(), "password".to_string())
    }

    async fn add_stream(&self, name: &str, components: &[u16], generation: u32) -> rvoip_jingle_transport::Result<Vec<TransportCandidate>> {
        if !self.gather_delay.is_zero() {
            tokio::time::sleep(self.gather_delay).await;
        }
        self.streams.lock().insert(name.to_string(), Vec::new());
        Ok(components
            .iter()
            .map(|&c| {
                TransportCandidate::host(format!("{}-{}", name, c), c, format!("127.0.0.1:{}", 40000 + c).parse().unwrap(), generation)
            })
            .collect())
    }

    async fn remove_stream(&self, name: &str) {
        self.streams.lock().remove(name);
    }

    async fn set_remote_credentials(&self, _stream: &str, _ufrag: Option<String>, _pwd: Option<String>) {}

    async fn add_remote_candidate(&self, stream: &str, candidate: TransportCandidate) -> rvoip_jingle_transport::Result<bool> {
        let mut streams = self.streams.lock();
        let remote = streams
            .get_mut(stream)
            .ok_or_else(|| TransportError::UnknownContent { name: stream.to_string() })?;
        remote.push(candidate);
        Ok(true)
    }

    async fn remote_candidate_counts(&self) -> Vec<(String, u16, usize)> {
        let streams = self.streams.lock();
        let mut counts = Vec::new();
        for (name, remote) in streams.iter() {
            for component in [COMPONENT_RTP, COMPONENT_RTCP] {
                counts.push((name.clone(), component, remote.iter().filter(|c| c.component == component).count()));
            }
        }
        counts
    }

    async fn start_connectivity_checks(&self) -> rvoip_jingle_transport::Result<()> {
        *self.checks_started.lock() += 1;
        self.state_tx.send_replace(ConnectivityState::Running);
        Ok(())
    }

    fn state(&self) -> ConnectivityState {
        *self.state_tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state_tx.subscribe()
    }

    async fn selected_pair(&self, stream: &str, component: u16) -> Option<(TransportCandidate, TransportCandidate)> {
        let remote = self.streams.lock().get(stream)?.iter().find(|c| c.component == component)?.clone();
        Some((remote.clone(), remote))
    }

    async fn close(&self) {
        self.state_tx.send_replace(ConnectivityState::Terminated);
    }
}

#[tokio::test]
async fn test_raw_wrapup_is_cached_within_a_generation() {
    let harvester = RawUdpHarvester::new(HarvesterConfig::default());
    harvester.start_harvest(&contents(&["audio", "video"])).await.unwrap();

    let first = harvester.wrapup().await.unwrap();
    let second = harvester.wrapup().await.unwrap();

    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
    assert_eq!(first[0].content, "audio");
    assert_eq!(first[1].content, "video");
    for description in &first {
        assert_eq!(description.kind, TransportKind::RawUdp);
        assert!(description.first_candidate(COMPONENT_RTP).is_some());
        assert!(description.first_candidate(COMPONENT_RTCP).is_some());
    }

    harvester.close().await;
}

#[tokio::test]
async fn test_wrapup_before_harvest_is_an_error() {
    let harvester = RawUdpHarvester::new(HarvesterConfig::default());
    assert!(matches!(harvester.wrapup().await, Err(TransportError::HarvestNotStarted)));
}

#[tokio::test]
async fn test_raw_target_comes_from_remote_candidates() {
    let harvester = RawUdpHarvester::new(HarvesterConfig::default());
    harvester.start_harvest(&contents(&["audio"])).await.unwrap();
    harvester.wrapup().await.unwrap();

    let started = harvester
        .start_connectivity_establishment(&[remote_transport("audio", TransportKind::RawUdp, 7078, 0)])
        .await
        .unwrap();
    assert!(started);
    assert_eq!(harvester.connectivity_state(), ConnectivityState::Completed);

    harvester.wrapup_connectivity_establishment().await.unwrap();
    let target = harvester.stream_target("audio").await.expect("target");
    assert_eq!(target.rtp.port(), 7078);
    assert_eq!(target.rtcp.port(), 7079);
    assert!(harvester.stream_connector("audio").is_some());

    harvester.close().await;
}

#[tokio::test]
async fn test_stale_generation_candidates_are_dropped() {
    let harvester = RawUdpHarvester::new(HarvesterConfig::default());
    harvester.start_harvest(&contents(&["audio"])).await.unwrap();
    harvester.wrapup().await.unwrap();
    assert_eq!(harvester.increment_generation(), 1);

    let accepted = harvester
        .start_connectivity_establishment(&[remote_transport("audio", TransportKind::RawUdp, 7078, 0)])
        .await
        .unwrap();

    assert!(!accepted);
    assert!(harvester.accepted_remote_candidates().is_empty());
    assert_eq!(harvester.stream_target("audio").await, None);

    harvester
        .start_connectivity_establishment(&[remote_transport("audio", TransportKind::RawUdp, 9000, 1)])
        .await
        .unwrap();
    assert!(harvester.accepted_remote_candidates().iter().all(|c| c.generation == 1));
    assert_eq!(harvester.stream_target("audio").await.map(|t| t.rtp.port()), Some(9000));

    harvester.close().await;
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let harvester = RawUdpHarvester::new(HarvesterConfig::default());
    harvester.start_harvest(&contents(&["audio"])).await.unwrap();
    harvester.wrapup().await.unwrap();

    harvester.close().await;
    harvester.close().await;

    assert!(harvester.is_closed());
    assert!(harvester.stream_connector("audio").is_none());
    assert_eq!(harvester.connectivity_state(), ConnectivityState::Terminated);
    assert!(matches!(harvester.wrapup().await, Err(TransportError::Closed)));
    assert!(matches!(harvester.start_harvest(&contents(&["video"])).await, Err(TransportError::Closed)));
}

#[tokio::test]
async fn test_ice_checks_wait_for_every_component() {
    let agent = ScriptedAgent::new(ConnectivityState::Completed);
    let harvester = IceUdpHarvester::with_agent(HarvesterConfig::default(), agent.clone());
    harvester.start_harvest(&contents(&["audio", "video"])).await.unwrap();
    let local = harvester.wrapup().await.unwrap();
    assert!(local.iter().all(|d| d.ufrag.as_deref() == Some("ufrag")));

    // Only audio has candidates: not enough to start
    let started = harvester
        .start_connectivity_establishment(&[remote_transport("audio", TransportKind::IceUdp, 5000, 0)])
        .await
        .unwrap();
    assert!(!started);
    assert_eq!(*agent.checks_started.lock(), 0);

    let started = harvester
        .start_connectivity_establishment(&[remote_transport("video", TransportKind::IceUdp, 5002, 0)])
        .await
        .unwrap();
    assert!(started);
    assert_eq!(*agent.checks_started.lock(), 1);

    // While checks run, an empty update starts nothing
    let started = harvester
        .start_connectivity_establishment(&[TransportDescription::new("audio", TransportKind::IceUdp)])
        .await
        .unwrap();
    assert!(!started);

    agent.finish_checks();
    harvester.wrapup_connectivity_establishment().await.unwrap();
    let target = harvester.stream_target("video").await.expect("target");
    assert_eq!(target.rtp.port(), 5002);

    harvester.close().await;
}

#[tokio::test]
async fn test_ice_failure_is_reported_by_wrapup() {
    let agent = ScriptedAgent::new(ConnectivityState::Failed);
    let harvester = IceUdpHarvester::with_agent(HarvesterConfig::default(), agent.clone());
    harvester.start_harvest(&contents(&["audio"])).await.unwrap();
    harvester.wrapup().await.unwrap();

    assert!(harvester
        .start_connectivity_establishment(&[remote_transport("audio", TransportKind::IceUdp, 5000, 0)])
        .await
        .unwrap());

    let waiter = {
        let harvester = harvester.clone();
        tokio::spawn(async move { harvester.wrapup_connectivity_establishment().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    agent.finish_checks();

    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(TransportError::ConnectivityFailed { .. })));
}

#[tokio::test]
async fn test_ice_ignores_candidates_for_unknown_streams() {
    let agent = ScriptedAgent::new(ConnectivityState::Completed);
    let harvester = IceUdpHarvester::with_agent(HarvesterConfig::default(), agent.clone());
    harvester.start_harvest(&contents(&["audio"])).await.unwrap();
    harvester.wrapup().await.unwrap();

    let started = harvester
        .start_connectivity_establishment(&[remote_transport("screen", TransportKind::IceUdp, 6000, 0)])
        .await
        .unwrap();

    assert!(!started);
    assert!(harvester.accepted_remote_candidates().is_empty());
}

#[tokio::test]
async fn test_ice_responder_keeps_candidates_offered_during_harvest() {
    let harvester = IceUdpHarvester::new(loopback_config(), IceRole::Controlled);
    harvester.start_harvest(&contents(&["audio"])).await.unwrap();

    // The offer's candidates arrive while the agent stream is still being gathered
    let offer = TransportDescription::new("audio", TransportKind::IceUdp)
        .with_credentials("rufrag", "rpassword")
        .with_candidates(vec![
            TransportCandidate::host("o1", COMPONENT_RTP, "127.0.0.1:47000".parse().unwrap(), 0),
            TransportCandidate::host("o2", COMPONENT_RTCP, "127.0.0.1:47001".parse().unwrap(), 0),
        ]);
    harvester.start_connectivity_establishment(&[offer]).await.unwrap();

    harvester.wrapup_connectivity_establishment().await.unwrap();
    let local = harvester.wrapup().await.unwrap();

    assert_eq!(local.len(), 1);
    assert_eq!(harvester.connectivity_state(), ConnectivityState::Completed);
    assert_eq!(harvester.accepted_remote_candidates().len(), 2);
    let target = harvester.stream_target("audio").await.expect("target");
    assert_eq!(target.rtp.port(), 47000);
    assert_eq!(target.rtcp.port(), 47001);

    harvester.close().await;
}

#[tokio::test]
async fn test_ice_parked_candidates_start_checks_once_gathered() {
    let agent = ScriptedAgent::slow(ConnectivityState::Completed, Duration::from_millis(20));
    let harvester = IceUdpHarvester::with_agent(HarvesterConfig::default(), agent.clone());
    harvester.start_harvest(&contents(&["audio"])).await.unwrap();

    let started = harvester
        .start_connectivity_establishment(&[remote_transport("audio", TransportKind::IceUdp, 5000, 0)])
        .await
        .unwrap();
    assert!(!started);
    assert_eq!(*agent.checks_started.lock(), 0);

    harvester.wrapup().await.unwrap();
    assert_eq!(*agent.checks_started.lock(), 1);
    assert_eq!(harvester.accepted_remote_candidates().len(), 2);

    agent.finish_checks();
    harvester.wrapup_connectivity_establishment().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_close_wakes_a_pending_wrapup() {
    let agent = ScriptedAgent::slow(ConnectivityState::Completed, Duration::from_secs(60));
    let harvester = IceUdpHarvester::with_agent(HarvesterConfig::default(), agent);
    harvester.start_harvest(&contents(&["audio"])).await.unwrap();

    let waiter = {
        let harvester = harvester.clone();
        tokio::spawn(async move { harvester.wrapup().await })
    };
    tokio::task::yield_now().await;

    let started = tokio::time::Instant::now();
    harvester.close().await;
    let result = waiter.await.unwrap();

    assert!(matches!(result, Err(TransportError::Closed)));
    assert!(started.elapsed() < HarvesterConfig::default().harvest_timeout());
    assert_ne!(harvester.harvest_state(), HarvestState::Completed);
}

#[tokio::test]
async fn test_harvest_finishing_after_close_is_discarded() {
    let agent = ScriptedAgent::slow(ConnectivityState::Completed, Duration::from_millis(20));
    let harvester = IceUdpHarvester::with_agent(HarvesterConfig::default(), agent.clone());
    harvester.start_harvest(&contents(&["audio"])).await.unwrap();
    harvester
        .start_connectivity_establishment(&[remote_transport("audio", TransportKind::IceUdp, 5000, 0)])
        .await
        .unwrap();

    harvester.close().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(harvester.harvest_state(), HarvestState::Failed);
    assert_eq!(*agent.checks_started.lock(), 0);
    assert!(harvester.accepted_remote_candidates().is_empty());
    assert!(harvester.stream_connector("audio").is_none());
    assert!(matches!(harvester.wrapup_connectivity_establishment().await, Err(TransportError::Closed)));
}
