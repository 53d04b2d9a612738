//! Configuration for the tracking synchronizer

use billing::ShipmentStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Synchronizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Carrier API base URL; `None` leaves the daemon without a carrier
    pub carrier_base_url: Option<String>,

    /// Seconds between sweeps (default: 4 hours)
    pub poll_interval_secs: u64,

    /// Per-poll timeout in milliseconds; a timeout is a transient failure
    pub poll_timeout_ms: u64,

    /// Polls in flight at once during a sweep
    pub max_concurrent_polls: usize,

    /// Additional carrier status strings, matched case-insensitively
    pub extra_status_mappings: BTreeMap<String, ShipmentStatus>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            carrier_base_url: None,
            poll_interval_secs: 4 * 60 * 60,
            poll_timeout_ms: 10_000,
            max_concurrent_polls: 16,
            extra_status_mappings: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(url) = std::env::var("SETTLEMENT_CARRIER_URL") {
            config.carrier_base_url = Some(url);
        }

        if let Ok(secs) = std::env::var("SETTLEMENT_TRACKING_INTERVAL_SECS") {
            config.poll_interval_secs = secs.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid tracking interval '{}': {}", secs, e))
            })?;
        }

        if let Ok(ms) = std::env::var("SETTLEMENT_POLL_TIMEOUT_MS") {
            config.poll_timeout_ms = ms.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid poll timeout '{}': {}", ms, e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or spin the sweep
    pub fn validate(&self) -> crate::Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(crate::Error::Config("Poll interval must be positive".to_string()));
        }
        if self.poll_timeout_ms == 0 {
            return Err(crate::Error::Config("Poll timeout must be positive".to_string()));
        }
        if self.max_concurrent_polls == 0 {
            return Err(crate::Error::Config(
                "At least one concurrent poll is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Poll timeout
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Sweep interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
