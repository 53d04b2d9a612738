//! Configuration for billing

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Billing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Combined GST rate applied to an invoice subtotal
    pub tax_rate: Decimal,

    /// Days after cycle end before an invoice is overdue
    pub due_days: i64,

    /// Seconds between close-and-invoice sweeps
    pub sweep_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tax_rate: dec!(0.18),
            due_days: 7,
            sweep_interval_secs: 3600,
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

        if let Ok(days) = std::env::var("SETTLEMENT_BILLING_DUE_DAYS") {
            config.due_days = days
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid due days '{}': {}", days, e)))?;
        }

        if let Ok(secs) = std::env::var("SETTLEMENT_BILLING_SWEEP_SECS") {
            config.sweep_interval_secs = secs.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid sweep interval '{}': {}", secs, e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Interval between close-and-invoice sweeps
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }

    /// Reject nonsensical values
    pub fn validate(&self) -> crate::Result<()> {
        if self.tax_rate < Decimal::ZERO || self.tax_rate >= Decimal::ONE {
            return Err(crate::Error::Config(format!(
                "Tax rate must be in [0, 1), got {}",
                self.tax_rate
            )));
        }
        if self.due_days < 0 {
            return Err(crate::Error::Config("Due days must not be negative".to_string()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(crate::Error::Config("Sweep interval must be positive".to_string()));
        }
        Ok(())
    }
}
