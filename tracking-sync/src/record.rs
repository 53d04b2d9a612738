//! Tracking records
//!
//! One record per waybill. A record stays active until its first terminal
//! status, after which sweeps skip it.

use crate::{Error, Result};
use billing::ShipmentStatus;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};

/// One accepted status observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Mapped status
    pub status: ShipmentStatus,
    /// Carrier's string
    pub raw_status: String,
    /// Carrier timestamp
    pub timestamp: DateTime<Utc>,
    /// Location or instruction text
    pub location: String,
}

/// Last failed poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollFailure {
    /// Error text
    pub message: String,
    /// When it failed
    pub at: DateTime<Utc>,
}

/// Tracking state for one waybill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingRecord {
    /// Carrier waybill number
    pub tracking_id: String,
    /// Shipment it belongs to
    pub shipment_id: String,
    /// Last accepted status
    pub current_status: ShipmentStatus,
    /// Accepted events, oldest first
    pub history: Vec<StatusEvent>,
    /// Polled on sweeps while true
    pub active: bool,
    /// Last poll attempt
    pub last_polled_at: Option<DateTime<Utc>>,
    /// Most recent failure, cleared by the next successful poll
    pub last_failure: Option<PollFailure>,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// When tracking started
    pub created_at: DateTime<Utc>,
}

impl TrackingRecord {
    /// Fresh record in `Booked`
    pub fn new(tracking_id: &str, shipment_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            tracking_id: tracking_id.to_string(),
            shipment_id: shipment_id.to_string(),
            current_status: ShipmentStatus::Booked,
            history: Vec::new(),
            active: true,
            last_polled_at: None,
            last_failure: None,
            consecutive_failures: 0,
            created_at: now,
        }
    }

    /// Apply an accepted event. A repeat of the latest (status, timestamp)
    /// pair is not appended again.
    pub fn record_event(&mut self, event: StatusEvent, now: DateTime<Utc>) {
        self.last_polled_at = Some(now);
        self.last_failure = None;
        self.consecutive_failures = 0;

        let repeat = self
            .history
            .iter()
            .any(|e| e.status == event.status && e.timestamp == event.timestamp);
        if !repeat {
            self.history.push(event.clone());
        }

        self.current_status = event.status;
        if event.status.is_terminal() {
            self.active = false;
        }
    }

    /// Poll succeeded but nothing changed
    pub fn record_unchanged(&mut self, now: DateTime<Utc>) {
        self.last_polled_at = Some(now);
        self.last_failure = None;
        self.consecutive_failures = 0;
    }

    /// Poll or downstream processing failed; status is untouched
    pub fn record_failure(&mut self, message: String, now: DateTime<Utc>) {
        self.last_polled_at = Some(now);
        self.last_failure = Some(PollFailure { message, at: now });
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }
}

/// Tracking records by waybill
#[derive(Debug, Default)]
pub struct TrackingStore {
    records: DashMap<String, TrackingRecord>,
}

impl TrackingStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a waybill. Registering the same pair again is a no-op
    /// returning the existing record.
    pub fn register(
        &self,
        tracking_id: &str,
        shipment_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TrackingRecord> {
        match self.records.entry(tracking_id.to_string()) {
            Entry::Occupied(e) if e.get().shipment_id == shipment_id => Ok(e.get().clone()),
            Entry::Occupied(e) => Err(Error::DuplicateTracking {
                tracking_id: tracking_id.to_string(),
                shipment_id: e.get().shipment_id.clone(),
            }),
            Entry::Vacant(e) => {
                let record = TrackingRecord::new(tracking_id, shipment_id, now);
                e.insert(record.clone());
                tracing::info!(tracking_id, shipment_id, "Tracking registered");
                Ok(record)
            }
        }
    }

    /// Record by waybill
    pub fn get(&self, tracking_id: &str) -> Result<TrackingRecord> {
        self.records
            .get(tracking_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::RecordNotFound(tracking_id.to_string()))
    }

    /// Snapshot of records still being polled
    pub fn active_records(&self) -> Vec<TrackingRecord> {
        self.records
            .iter()
            .filter(|r| r.active)
            .map(|r| r.value().clone())
            .collect()
    }

    /// Mutate a record in place
    pub fn update<T>(&self, tracking_id: &str, f: impl FnOnce(&mut TrackingRecord) -> T) -> Result<T> {
        let mut record = self
            .records
            .get_mut(tracking_id)
            .ok_or_else(|| Error::RecordNotFound(tracking_id.to_string()))?;
        Ok(f(record.value_mut()))
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
