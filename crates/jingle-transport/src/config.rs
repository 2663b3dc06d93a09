//! Harvester configuration

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_CONNECTIVITY_TIMEOUT_MS, DEFAULT_HARVEST_TIMEOUT_MS};
use crate::error::{Result, TransportError};

/// Settings shared by the raw-udp and ice-udp harvesters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvesterConfig {
    /// Address local sockets are bound to
    pub bind_address: IpAddr,

    /// Address advertised in host candidates when `bind_address` is unspecified
    pub advertised_address: Option<IpAddr>,

    /// Lowest port tried for RTP (0 lets the OS choose)
    pub port_min: u16,

    /// Highest port tried for RTP
    pub port_max: u16,

    /// Upper bound for `wrapup()`
    pub harvest_timeout_ms: u64,

    /// Upper bound for `wrapup_connectivity_establishment()`
    pub connectivity_timeout_ms: u64,

    /// Remote candidates every component needs before checks start
    pub min_remote_candidates_per_component: usize,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            advertised_address: None,
            port_min: 0,
            port_max: 0,
            harvest_timeout_ms: DEFAULT_HARVEST_TIMEOUT_MS,
            connectivity_timeout_ms: DEFAULT_CONNECTIVITY_TIMEOUT_MS,
            min_remote_candidates_per_component: 1,
        }
    }
}

impl HarvesterConfig {
    pub fn builder() -> HarvesterConfigBuilder {
        HarvesterConfigBuilder::default()
    }

    pub fn harvest_timeout(&self) -> Duration {
        Duration::from_millis(self.harvest_timeout_ms)
    }

    pub fn connectivity_timeout(&self) -> Duration {
        Duration::from_millis(self.connectivity_timeout_ms)
    }

    /// Address written into host candidates for a socket bound to `bound`
    pub fn candidate_address(&self, bound: IpAddr) -> IpAddr {
        if !bound.is_unspecified() {
            return bound;
        }
        self.advertised_address
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    pub fn validate(&self) -> Result<()> {
        if self.port_min > self.port_max {
            return Err(TransportError::configuration(format!(
                "port_min {} is above port_max {}",
                self.port_min, self.port_max
            )));
        }
        if self.port_min != 0 && self.port_max == u16::MAX {
            return Err(TransportError::configuration("port_max leaves no room for an RTCP port"));
        }
        if self.min_remote_candidates_per_component == 0 {
            return Err(TransportError::configuration(
                "min_remote_candidates_per_component must be at least 1",
            ));
        }
        if self.harvest_timeout_ms == 0 || self.connectivity_timeout_ms == 0 {
            return Err(TransportError::configuration("timeouts must be non-zero"));
        }
        Ok(())
    }
}

/// Builder for [`HarvesterConfig`]
#[derive(Debug, Default)]
pub struct HarvesterConfigBuilder {
    config: HarvesterConfig,
}

impl HarvesterConfigBuilder {
    pub fn bind_address(mut self, address: IpAddr) -> Self {
        self.config.bind_address = address;
        self
    }

    pub fn advertised_address(mut self, address: IpAddr) -> Self {
        self.config.advertised_address = Some(address);
        self
    }

    pub fn port_range(mut self, min: u16, max: u16) -> Self {
        self.config.port_min = min;
        self.config.port_max = max;
        self
    }

    pub fn harvest_timeout(mut self, timeout: Duration) -> Self {
        self.config.harvest_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn connectivity_timeout(mut self, timeout: Duration) -> Self {
        self.config.connectivity_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn min_remote_candidates_per_component(mut self, count: usize) -> Self {
        self.config.min_remote_candidates_per_component = count;
        self
    }

    pub fn build(self) -> Result<HarvesterConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
