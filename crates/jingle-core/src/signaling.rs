//! The signaling transport the engine sends through, and a discovery cache
//! in front of it.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use rvoip_jingle_transport::constants::{NS_ICE_UDP, NS_RAW_UDP};
use rvoip_jingle_transport::TransportKind;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{JingleError, Result};
use crate::jingle::{Jid, Stanza};

/// Jingle (XEP-0166)
pub const FEATURE_JINGLE: &str = "urn:xmpp:jingle:1";

/// Jingle RTP sessions (XEP-0167)
pub const FEATURE_JINGLE_RTP: &str = "urn:xmpp:jingle:apps:rtp:1";

/// Conference-info notifications (XEP-0298)
pub const FEATURE_COIN: &str = "urn:xmpp:coin";

/// Legacy Google Talk voice sessions
pub const FEATURE_GTALK_VOICE: &str = "http://www.google.com/xmpp/protocol/voice/v1";

/// Discovery identity of an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub category: String,
    pub kind: String,
    pub name: Option<String>,
}

/// Result of a service discovery query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub features: HashSet<String>,
    pub identities: Vec<Identity>,
}

impl FeatureSet {
    pub fn new<I, S>(features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            features: features.into_iter().map(Into::into).collect(),
            identities: Vec::new(),
        }
    }

    pub fn with_identity(mut self, category: &str, kind: &str, name: Option<&str>) -> Self {
        self.identities.push(Identity {
            category: category.to_string(),
            kind: kind.to_string(),
            name: name.map(str::to_string),
        });
        self
    }

    pub fn supports(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    /// Preferred transport the peer understands: ice-udp, then raw-udp
    pub fn preferred_transport(&self) -> Option<TransportKind> {
        if self.supports(NS_ICE_UDP) {
            Some(TransportKind::IceUdp)
        } else if self.supports(NS_RAW_UDP) {
            Some(TransportKind::RawUdp)
        } else {
            None
        }
    }

    pub fn identity_names(&self) -> impl Iterator<Item = &str> {
        self.identities.iter().filter_map(|i| i.name.as_deref())
    }
}

/// XMPP connection as seen by the engine
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Our own full address
    fn local_jid(&self) -> Jid;

    /// Deliver `stanza` to `to`
    async fn send(&self, to: &Jid, stanza: Stanza) -> anyhow::Result<()>;

    /// Service discovery for a full address
    async fn discover_features(&self, jid: &Jid) -> anyhow::Result<FeatureSet>;
}

/// Remembers discovery results per full address
pub struct CapabilityCache {
    signaling: Arc<dyn SignalingTransport>,
    cache: DashMap<Jid, FeatureSet>,
}

impl CapabilityCache {
    pub fn new(signaling: Arc<dyn SignalingTransport>) -> Self {
        Self {
            signaling,
            cache: DashMap::new(),
        }
    }

    /// Features of `jid`, discovered on first use. Failures are not cached.
    pub async fn features(&self, jid: &Jid) -> Result<FeatureSet> {
        if let Some(features) = self.cache.get(jid) {
            return Ok(features.clone());
        }

        let features = self
            .signaling
            .discover_features(jid)
            .await
            .map_err(|e| JingleError::signaling(format!("discovery of {} failed: {:#}", jid, e)))?;
        debug!("Discovered {} feature(s) for {}", features.features.len(), jid);
        self.cache.insert(jid.clone(), features.clone());
        Ok(features)
    }

    pub fn cached(&self, jid: &Jid) -> Option<FeatureSet> {
        self.cache.get(jid).map(|f| f.clone())
    }

    /// Seed the cache, e.g. from entity capabilities in presence
    pub fn insert(&self, jid: Jid, features: FeatureSet) {
        self.cache.insert(jid, features);
    }

    pub fn invalidate(&self, jid: &Jid) {
        self.cache.remove(jid);
    }
}
