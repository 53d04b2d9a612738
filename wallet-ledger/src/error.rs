//! Error types for the wallet ledger

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Non-positive amount or otherwise malformed posting
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Debit refused; the wallet cannot go negative
    #[error("Insufficient balance for {merchant_id}: required {required}, available {available}")]
    InsufficientBalance {
        /// Merchant whose wallet was debited
        merchant_id: String,
        /// Debit amount
        required: Decimal,
        /// Balance at the time of the debit
        available: Decimal,
    },

    /// Transaction not found
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// A refund for this transaction already exists
    #[error("Transaction already reversed: {0}")]
    AlreadyReversed(String),

    /// Invariant violation (broken balance chain, out-of-order append)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error is a refused debit
    pub fn is_insufficient_balance(&self) -> bool {
        matches!(self, Error::InsufficientBalance { .. })
    }
}

#[cfg(feature = "rocksdb")]
impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

#[cfg(feature = "rocksdb")]
impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
