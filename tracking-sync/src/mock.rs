//! In-memory carrier for tests and local runs

use crate::carrier::{CarrierClient, CarrierStatus, ZoneQuery};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Scriptable carrier
///
/// Zones are keyed by destination pincode. Statuses, failures and delays are
/// keyed by tracking id. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockCarrier {
    zones: Arc<DashMap<String, String>>,
    statuses: Arc<DashMap<String, CarrierStatus>>,
    failing: Arc<DashSet<String>>,
    delays: Arc<DashMap<String, Duration>>,
    polls: Arc<AtomicU64>,
}

impl MockCarrier {
    /// Empty carrier
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer zone lookups for `destination_pincode` with `zone`
    pub fn set_zone(&self, destination_pincode: &str, zone: &str) {
        self.zones
            .insert(destination_pincode.to_string(), zone.to_string());
    }

    /// Report `status` for a waybill
    pub fn set_status(&self, tracking_id: &str, status: &str, timestamp: DateTime<Utc>) {
        self.statuses.insert(
            tracking_id.to_string(),
            CarrierStatus {
                status: status.to_string(),
                timestamp,
                location: String::new(),
            },
        );
    }

    /// Make polls for a waybill fail (or succeed again)
    pub fn fail(&self, tracking_id: &str, failing: bool) {
        if failing {
            self.failing.insert(tracking_id.to_string());
        } else {
            self.failing.remove(tracking_id);
        }
    }

    /// Delay polls for a waybill
    pub fn delay(&self, tracking_id: &str, delay: Duration) {
        self.delays.insert(tracking_id.to_string(), delay);
    }

    /// Polls served so far, including failed ones
    pub fn poll_count(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CarrierClient for MockCarrier {
    async fn lookup_zone(&self, query: &ZoneQuery) -> Result<String> {
        self.zones
            .get(&query.destination_pincode)
            .map(|z| z.value().clone())
            .ok_or_else(|| {
                Error::CarrierUnavailable(format!(
                    "No route to {}",
                    query.destination_pincode
                ))
            })
    }

    async fn poll(&self, tracking_id: &str) -> Result<CarrierStatus> {
        self.polls.fetch_add(1, Ordering::Relaxed);

        let delay = self.delays.get(tracking_id).map(|d| *d.value());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.contains(tracking_id) {
            debug!(tracking_id, "Mock carrier: simulated failure");
            return Err(Error::CarrierUnavailable(format!(
                "Simulated failure for {}",
                tracking_id
            )));
        }

        self.statuses
            .get(tracking_id)
            .map(|s| s.value().clone())
            .ok_or_else(|| Error::InvalidResponse(format!("Unknown waybill {}", tracking_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::ServiceMode;
    use billing::PaymentMode;

    #[tokio::test]
    async fn test_scripted_answers() {
        let carrier = MockCarrier::new();
        carrier.set_zone("560001", "C2");
        carrier.set_status("AWB1", "In Transit", Utc::now());

        let query = ZoneQuery {
            origin_pincode: "110001".to_string(),
            destination_pincode: "560001".to_string(),
            chargeable_weight_grams: 500,
            service_mode: ServiceMode::Surface,
            payment_mode: PaymentMode::Prepaid,
        };
        assert_eq!(carrier.lookup_zone(&query).await.unwrap(), "C2");
        assert_eq!(carrier.poll("AWB1").await.unwrap().status, "In Transit");

        carrier.fail("AWB1", true);
        assert!(carrier.poll("AWB1").await.unwrap_err().is_transient());
        assert_eq!(carrier.poll_count(), 2);
    }
}
