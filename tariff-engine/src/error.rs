//! Error types for the tariff engine

use thiserror::Error;

/// Tariff engine error
#[derive(Debug, Error)]
pub enum Error {
    /// Bad zone, tier, weight or amount. Rejected before any computation.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Tariff table violates the slab invariants
    #[error("Invalid tariff table: {0}")]
    InvalidTable(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error was caused by caller-supplied input
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Error::InvalidInput(_))
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
