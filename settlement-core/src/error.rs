//! Error types for the settlement facade

use thiserror::Error;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Pricing error
    #[error(transparent)]
    Tariff(#[from] tariff_engine::Error),

    /// Wallet error
    #[error(transparent)]
    Ledger(#[from] wallet_ledger::Error),

    /// Billing error
    #[error(transparent)]
    Billing(#[from] billing::Error),

    /// Carrier or tracking error
    #[error(transparent)]
    Tracking(#[from] tracking_sync::Error),

    /// Merchant has no profile
    #[error("Merchant not registered: {0}")]
    MerchantNotFound(String),

    /// Rejected request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Caller-facing classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad zone, tier, weight or amount; nothing was changed
    InvalidInput,
    /// Wallet cannot cover the debit; the order must be rolled back
    InsufficientBalance,
    /// Carrier could not be reached; retried on the next attempt
    CarrierUnavailable,
    /// Missing state codes block invoicing
    TaxConfiguration,
    /// Unknown merchant, invoice, shipment or tracking id
    NotFound,
    /// Anything else
    Internal,
}

impl Error {
    /// Classify for callers
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::MerchantNotFound(_) => ErrorKind::NotFound,
            Error::Tariff(e) if e.is_invalid_input() => ErrorKind::InvalidInput,
            Error::Ledger(e) => ledger_kind(e),
            Error::Billing(e) => billing_kind(e),
            Error::Tracking(e) => tracking_kind(e),
            _ => ErrorKind::Internal,
        }
    }
}

fn ledger_kind(e: &wallet_ledger::Error) -> ErrorKind {
    match e {
        wallet_ledger::Error::InvalidInput(_) => ErrorKind::InvalidInput,
        wallet_ledger::Error::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
        wallet_ledger::Error::TransactionNotFound(_) => ErrorKind::NotFound,
        _ => ErrorKind::Internal,
    }
}

fn billing_kind(e: &billing::Error) -> ErrorKind {
    match e {
        billing::Error::Ledger(inner) => ledger_kind(inner),
        billing::Error::Tariff(inner) if inner.is_invalid_input() => ErrorKind::InvalidInput,
        billing::Error::InvalidInput(_) => ErrorKind::InvalidInput,
        billing::Error::TaxConfiguration(_) => ErrorKind::TaxConfiguration,
        billing::Error::InvoiceNotFound(_)
        | billing::Error::ShipmentNotFound(_)
        | billing::Error::CycleNotFound(_) => ErrorKind::NotFound,
        _ => ErrorKind::Internal,
    }
}

fn tracking_kind(e: &tracking_sync::Error) -> ErrorKind {
    match e {
        e if e.is_transient() => ErrorKind::CarrierUnavailable,
        tracking_sync::Error::InvalidResponse(_) => ErrorKind::CarrierUnavailable,
        tracking_sync::Error::RecordNotFound(_) => ErrorKind::NotFound,
        tracking_sync::Error::DuplicateTracking { .. } => ErrorKind::InvalidInput,
        tracking_sync::Error::Billing(inner) => billing_kind(inner),
        _ => ErrorKind::Internal,
    }
}
