//! Carrier integration
//!
//! The carrier is an external collaborator reached through [`CarrierClient`].
//! [`HttpCarrierClient`] speaks a small JSON API:
//!
//! - `GET {base}/zone?origin=&destination=&weight_grams=&mode=&payment=` →
//!   `{"zone": "C2"}`
//! - `GET {base}/track/{tracking_id}` →
//!   `{"status": "In Transit", "timestamp": "...", "location": "..."}`

use crate::{Error, Result};
use async_trait::async_trait;
use billing::PaymentMode;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Service level requested from the carrier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceMode {
    /// Ground
    Surface,
    /// Air
    Express,
}

impl ServiceMode {
    fn as_str(&self) -> &'static str {
        match self {
            ServiceMode::Surface => "surface",
            ServiceMode::Express => "express",
        }
    }
}

/// Zone lookup request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneQuery {
    /// Pickup postal code
    pub origin_pincode: String,
    /// Delivery postal code
    pub destination_pincode: String,
    /// Chargeable weight
    pub chargeable_weight_grams: u32,
    /// Service level
    pub service_mode: ServiceMode,
    /// Prepaid or COD
    pub payment_mode: PaymentMode,
}

/// Status reported by the carrier for one waybill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierStatus {
    /// Carrier's own status string
    pub status: String,
    /// When the carrier recorded it
    pub timestamp: DateTime<Utc>,
    /// Free-text location or instruction
    #[serde(default)]
    pub location: String,
}

/// Carrier API
#[async_trait]
pub trait CarrierClient: Send + Sync {
    /// Raw zone code, possibly a legacy sub-code; callers canonicalize it
    async fn lookup_zone(&self, query: &ZoneQuery) -> Result<String>;

    /// Latest status for a waybill
    async fn poll(&self, tracking_id: &str) -> Result<CarrierStatus>;
}

#[derive(Debug, Deserialize)]
struct ZoneResponse {
    zone: String,
}

/// JSON-over-HTTP carrier client
#[derive(Debug, Clone)]
pub struct HttpCarrierClient {
    base_url: Url,
    http: reqwest::Client,
}

impl HttpCarrierClient {
    /// Create client; `timeout` bounds every request
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid carrier URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!("Carrier URL {} cannot be a base", base_url)));
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { base_url, http })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("Carrier URL {} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self.http.get(url.clone()).query(query).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::CarrierUnavailable(format!("{} returned {}", url, status)));
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| Error::InvalidResponse(format!("{}: {}", url, e)))
    }
}

#[async_trait]
impl CarrierClient for HttpCarrierClient {
    async fn lookup_zone(&self, query: &ZoneQuery) -> Result<String> {
        let payment = match query.payment_mode {
            PaymentMode::Prepaid => "prepaid",
            PaymentMode::Cod => "cod",
        };
        let params = [
            ("origin", query.origin_pincode.clone()),
            ("destination", query.destination_pincode.clone()),
            ("weight_grams", query.chargeable_weight_grams.to_string()),
            ("mode", query.service_mode.as_str().to_string()),
            ("payment", payment.to_string()),
        ];

        let response: ZoneResponse = self.get_json(self.endpoint(&["zone"])?, &params).await?;
        tracing::debug!(
            origin = %query.origin_pincode,
            destination = %query.destination_pincode,
            zone = %response.zone,
            "Carrier zone lookup"
        );
        Ok(response.zone)
    }

    async fn poll(&self, tracking_id: &str) -> Result<CarrierStatus> {
        self.get_json(self.endpoint(&["track", tracking_id])?, &[]).await
    }
}
