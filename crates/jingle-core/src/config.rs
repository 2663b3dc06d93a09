//! Engine configuration
//!
//! Every section has defaults, so an empty file is a valid configuration.
//! Files are read as TOML or JSON depending on their extension, and a few
//! settings can be overridden from the environment.

use std::path::Path;
use std::time::Duration;

use rvoip_jingle_transport::HarvesterConfig;
use serde::{Deserialize, Serialize};

use crate::error::{JingleError, Result};
use crate::logging::LoggingConfig;

/// Default minimum spacing of conference-info notifications to one peer
pub const DEFAULT_COIN_MIN_INTERVAL_MS: u64 = 200;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JingleConfig {
    pub coin: CoinConfig,
    pub media: MediaConfig,
    pub transport: HarvesterConfig,
    pub compat: CompatConfig,
    pub logging: LoggingConfig,
}

/// Conference-info notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoinConfig {
    /// Never send conference-info
    pub disabled: bool,
    pub min_interval_ms: u64,
    /// Send diffs after the first full document
    pub partial_notifications: bool,
}

impl Default for CoinConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            min_interval_ms: DEFAULT_COIN_MIN_INTERVAL_MS,
            partial_notifications: true,
        }
    }
}

impl CoinConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Translate RTP between conference members when acting as focus
    pub rtp_translation: bool,
    /// SRTP suites we can use, in preference order
    pub supported_crypto_suites: Vec<String>,
    /// Whether local video is sent when a call starts
    pub local_video_allowed: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            rtp_translation: false,
            supported_crypto_suites: vec!["AES_CM_128_HMAC_SHA1_80".to_string()],
            local_video_allowed: false,
        }
    }
}

/// Peer-specific interoperability behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompatConfig {
    /// Discovery identity names of peers that send session-accept before
    /// their transport candidates
    pub accept_before_candidates: Vec<String>,
}

impl Default for CompatConfig {
    fn default() -> Self {
        Self {
            accept_before_candidates: vec!["FreeSWITCH".to_string()],
        }
    }
}

impl JingleConfig {
    /// Load from a `.toml` or `.json` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| JingleError::configuration(format!("cannot read {}: {}", path.display(), e)))?;

        let config: JingleConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&text)
                .map_err(|e| JingleError::configuration(format!("invalid TOML in {}: {}", path.display(), e)))?,
            Some("json") => serde_json::from_str(&text)
                .map_err(|e| JingleError::configuration(format!("invalid JSON in {}: {}", path.display(), e)))?,
            _ => {
                return Err(JingleError::configuration(format!(
                    "unsupported config format: {}",
                    path.display()
                )))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `JINGLE_DISABLE_COIN`, `JINGLE_COIN_MIN_INTERVAL_MS` and
    /// `JINGLE_LOG_LEVEL`
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var("JINGLE_DISABLE_COIN") {
            self.coin.disabled = matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(value) = std::env::var("JINGLE_COIN_MIN_INTERVAL_MS") {
            self.coin.min_interval_ms = value.parse().map_err(|_| {
                JingleError::configuration(format!("JINGLE_COIN_MIN_INTERVAL_MS is not a number: {}", value))
            })?;
        }
        if let Ok(value) = std::env::var("JINGLE_LOG_LEVEL") {
            self.logging.level = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.transport
            .validate()
            .map_err(|e| JingleError::configuration(e.to_string()))?;
        crate::logging::parse_log_level(&self.logging.level)?;
        Ok(())
    }
}
