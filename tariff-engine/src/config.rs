//! Configuration for the tariff engine

use crate::{Error, Result, TariffBook, TariffTable, Tier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Tariff engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// TOML file with tier tables. Built-in tables are used when unset.
    #[serde(default)]
    pub tables_path: Option<PathBuf>,
}

/// On-disk layout of a tariff file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TariffFile {
    tiers: BTreeMap<String, TariffTable>,
}

impl Config {
    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(path) = std::env::var("SETTLEMENT_TARIFF_TABLES") {
            config.tables_path = Some(PathBuf::from(path));
        }

        Ok(config)
    }

    /// Build the tariff book this configuration points at
    pub fn load_book(&self) -> Result<TariffBook> {
        match &self.tables_path {
            Some(path) => TariffBook::from_file(path),
            None => Ok(TariffBook::standard()),
        }
    }
}

impl TariffBook {
    /// Load tier tables from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let book = Self::from_toml_str(&content)?;
        tracing::info!(path = %path.as_ref().display(), "Loaded tariff tables");
        Ok(book)
    }

    /// Parse tier tables from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TariffFile = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse tariff tables: {}", e)))?;

        Self::new(
            file.tiers
                .into_iter()
                .map(|(name, table)| (Tier::new(name), table)),
        )
    }
}
