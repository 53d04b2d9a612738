//! Error types for billing

use thiserror::Error;

/// Result type for billing operations
pub type Result<T> = std::result::Result<T, Error>;

/// Billing errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] wallet_ledger::Error),

    /// Tariff error
    #[error("Tariff error: {0}")]
    Tariff(#[from] tariff_engine::Error),

    /// Cycle is not accepting shipments
    #[error("Billing cycle {0} is not open")]
    CycleNotOpen(String),

    /// Cycle must be closed before it can be invoiced
    #[error("Billing cycle {0} is not closed")]
    CycleNotClosed(String),

    /// Cycle not found
    #[error("Billing cycle not found: {0}")]
    CycleNotFound(String),

    /// Missing or malformed state codes block invoicing
    #[error("Tax configuration error: {0}")]
    TaxConfiguration(String),

    /// Invoice not found
    #[error("Invoice not found: {0}")]
    InvoiceNotFound(String),

    /// Payment recorded against a settled invoice
    #[error("Billing cycle {0} nets to a credit; refunds must be credit notes")]
    NegativeSubtotal(String),

    #[error("Invoice already paid: {0}")]
    InvoiceAlreadyPaid(String),

    /// Shipment not known to any cycle
    #[error("Shipment not found: {0}")]
    ShipmentNotFound(String),

    /// Malformed request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the wallet refused a debit
    pub fn is_insufficient_balance(&self) -> bool {
        matches!(self, Error::Ledger(e) if e.is_insufficient_balance())
    }
}
