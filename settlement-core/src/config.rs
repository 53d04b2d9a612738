//! Configuration for the settlement daemon
//!
//! One TOML file with a section per component:
//!
//! ```toml
//! [tariff]
//! tables_path = "/etc/settlement/tariffs.toml"
//!
//! [ledger]
//! backend = "rocksdb"
//! data_dir = "/var/lib/settlement/ledger"
//!
//! [billing]
//! tax_rate = "0.18"
//! due_days = 7
//!
//! [tracking]
//! carrier_base_url = "https://carrier.example/api"
//! poll_interval_secs = 14400
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settlement configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tariff tables
    pub tariff: tariff_engine::Config,

    /// Wallet storage
    pub ledger: wallet_ledger::Config,

    /// Cycles and invoices
    pub billing: billing::Config,

    /// Carrier polling
    pub tracking: tracking_sync::Config,
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables (`SETTLEMENT_*`)
    pub fn from_env() -> Result<Self> {
        let config = Config {
            tariff: tariff_engine::Config::from_env()?,
            ledger: wallet_ledger::Config::from_env()?,
            billing: billing::Config::from_env()?,
            tracking: tracking_sync::Config::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.billing.validate()?;
        self.tracking.validate()?;
        Ok(())
    }
}
