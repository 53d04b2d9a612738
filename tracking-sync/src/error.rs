//! Error types for tracking synchronization

use thiserror::Error;

/// Result type for tracking operations
pub type Result<T> = std::result::Result<T, Error>;

/// Tracking errors
#[derive(Error, Debug)]
pub enum Error {
    /// Carrier could not be reached or answered with an error; retried on
    /// the next sweep
    #[error("Carrier unavailable: {0}")]
    CarrierUnavailable(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Carrier answered with something we cannot read
    #[error("Invalid carrier response: {0}")]
    InvalidResponse(String),

    /// No tracking record for this id
    #[error("Tracking record not found: {0}")]
    RecordNotFound(String),

    /// Tracking id already bound to another shipment
    #[error("Tracking id {tracking_id} already registered for shipment {shipment_id}")]
    DuplicateTracking {
        /// Waybill
        tracking_id: String,
        /// Shipment that owns it
        shipment_id: String,
    },

    /// Downstream billing refused the transition
    #[error("Billing error: {0}")]
    Billing(#[from] billing::Error),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Worth retrying on the next sweep
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::CarrierUnavailable(_) | Error::Http(_))
    }
}
