//! Status sweep
//!
//! A sweep polls every active tracking record once, with bounded concurrency
//! and a timeout per poll. Nothing is retried inside a sweep; a failed poll
//! is noted on the record and picked up again next time.

use crate::{
    carrier::CarrierClient,
    mapper::StatusMapper,
    metrics::SyncMetrics,
    record::{StatusEvent, TrackingRecord, TrackingStore},
    Config, Result,
};
use billing::SweepGuard;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Receives accepted status transitions
///
/// Returning an error leaves the tracking record untouched, so the same
/// transition is offered again on the next sweep.
pub trait StatusEventHandler: Send + Sync {
    /// Apply a transition for `record.shipment_id`
    fn on_status(&self, record: &TrackingRecord, event: &StatusEvent) -> Result<()>;
}

/// Counts from one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Records polled
    pub polled: usize,
    /// Transitions applied
    pub transitions: usize,
    /// Polls that returned the current status
    pub unchanged: usize,
    /// Polls with an unknown carrier status
    pub unmapped: usize,
    /// Failed polls or refused transitions
    pub failures: usize,
    /// Records that reached a terminal status
    pub deactivated: usize,
    /// Another sweep was running; nothing was done
    pub skipped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollOutcome {
    Transition { terminal: bool },
    Unchanged,
    Unmapped,
    Failed,
}

/// Carrier status synchronizer
pub struct Synchronizer {
    client: Arc<dyn CarrierClient>,
    handler: Arc<dyn StatusEventHandler>,
    store: Arc<TrackingStore>,
    mapper: StatusMapper,
    poll_timeout: Duration,
    max_concurrent: usize,
    guard: SweepGuard,
    metrics: SyncMetrics,
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("records", &self.store.len())
            .field("poll_timeout", &self.poll_timeout)
            .field("max_concurrent", &self.max_concurrent)
            .field("running", &self.guard.is_running())
            .finish()
    }
}

impl Synchronizer {
    /// Create synchronizer
    pub fn new(
        client: Arc<dyn CarrierClient>,
        handler: Arc<dyn StatusEventHandler>,
        store: Arc<TrackingStore>,
        config: &Config,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            client,
            handler,
            store,
            mapper: StatusMapper::with_extra(&config.extra_status_mappings),
            poll_timeout: config.poll_timeout(),
            max_concurrent: config.max_concurrent_polls,
            guard: SweepGuard::new(),
            metrics: SyncMetrics::new()?,
        })
    }

    /// Tracking records
    pub fn store(&self) -> &Arc<TrackingStore> {
        &self.store
    }

    /// Get metrics
    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    /// Poll every active record once
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let Some(_permit) = self.guard.try_start() else {
            info!("Tracking sweep already running, skipping");
            return SweepReport {
                skipped: true,
                ..SweepReport::default()
            };
        };

        let timer = self.metrics.sweep_duration.start_timer();
        let records = self.store.active_records();
        debug!(records = records.len(), "Starting tracking sweep");

        let outcomes: Vec<PollOutcome> = stream::iter(records)
            .map(|record| self.sync_record(record, now))
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let mut report = SweepReport {
            polled: outcomes.len(),
            ..SweepReport::default()
        };
        for outcome in outcomes {
            match outcome {
                PollOutcome::Transition { terminal } => {
                    report.transitions += 1;
                    if terminal {
                        report.deactivated += 1;
                    }
                }
                PollOutcome::Unchanged => report.unchanged += 1,
                PollOutcome::Unmapped => report.unmapped += 1,
                PollOutcome::Failed => report.failures += 1,
            }
        }
        timer.observe_duration();

        info!(
            polled = report.polled,
            transitions = report.transitions,
            failures = report.failures,
            deactivated = report.deactivated,
            "Tracking sweep complete"
        );
        report
    }

    /// Poll a single record now, outside the periodic sweep. Returns the
    /// record as stored afterwards.
    pub async fn refresh(&self, tracking_id: &str, now: DateTime<Utc>) -> Result<TrackingRecord> {
        let record = self.store.get(tracking_id)?;
        if record.active {
            self.sync_record(record, now).await;
        }
        self.store.get(tracking_id)
    }

    async fn sync_record(&self, record: TrackingRecord, now: DateTime<Utc>) -> PollOutcome {
        self.metrics.polls_total.inc();

        let poll = self.client.poll(&record.tracking_id);
        let polled = match tokio::time::timeout(self.poll_timeout, poll).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return self.fail(&record, e.to_string(), now),
            Err(_) => {
                return self.fail(
                    &record,
                    format!("Poll timed out after {} ms", self.poll_timeout.as_millis()),
                    now,
                )
            }
        };

        let Some(status) = self.mapper.map(&polled.status) else {
            warn!(
                tracking_id = %record.tracking_id,
                raw_status = %polled.status,
                "Unmapped carrier status, leaving shipment unchanged"
            );
            self.metrics.unmapped_total.inc();
            self.touch(&record, |r| r.record_unchanged(now));
            return PollOutcome::Unmapped;
        };

        if status == record.current_status {
            self.touch(&record, |r| r.record_unchanged(now));
            return PollOutcome::Unchanged;
        }

        let event = StatusEvent {
            status,
            raw_status: polled.status,
            timestamp: polled.timestamp,
            location: polled.location,
        };

        if let Err(e) = self.handler.on_status(&record, &event) {
            return self.fail(&record, format!("Transition refused: {}", e), now);
        }

        debug!(
            tracking_id = %record.tracking_id,
            shipment_id = %record.shipment_id,
            from = %record.current_status,
            to = %status,
            "Status transition applied"
        );
        self.metrics.transitions_total.inc();
        self.touch(&record, |r| r.record_event(event, now));

        PollOutcome::Transition {
            terminal: status.is_terminal(),
        }
    }

    fn fail(&self, record: &TrackingRecord, message: String, now: DateTime<Utc>) -> PollOutcome {
        warn!(
            tracking_id = %record.tracking_id,
            error = %message,
            "Tracking poll failed, will retry next sweep"
        );
        self.metrics.poll_failures_total.inc();
        self.touch(record, |r| r.record_failure(message, now));
        PollOutcome::Failed
    }

    fn touch(&self, record: &TrackingRecord, f: impl FnOnce(&mut TrackingRecord)) {
        if let Err(e) = self.store.update(&record.tracking_id, f) {
            warn!(tracking_id = %record.tracking_id, error = %e, "Tracking record vanished");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCarrier;
    use billing::ShipmentStatus;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, ShipmentStatus)>>,
    }

    impl StatusEventHandler for Recorder {
        fn on_status(&self, record: &TrackingRecord, event: &StatusEvent) -> Result<()> {
            self.seen
                .lock()
                .unwrap()
                .push((record.shipment_id.clone(), event.status));
            Ok(())
        }
    }

    fn setup() -> (MockCarrier, Arc<Recorder>, Synchronizer) {
        let carrier = MockCarrier::new();
        let recorder = Arc::new(Recorder::default());
        let sync = Synchronizer::new(
            Arc::new(carrier.clone()),
            recorder.clone(),
            Arc::new(TrackingStore::new()),
            &Config::default(),
        )
        .unwrap();
        (carrier, recorder, sync)
    }

    #[tokio::test]
    async fn test_sweep_applies_and_latches() {
        let (carrier, recorder, sync) = setup();
        sync.store().register("AWB1", "S-1", Utc::now()).unwrap();
        carrier.set_status("AWB1", "Delivered", Utc::now());

        let report = sync.sweep(Utc::now()).await;
        assert_eq!(report.transitions, 1);
        assert_eq!(report.deactivated, 1);
        assert_eq!(
            recorder.seen.lock().unwrap().as_slice(),
            &[("S-1".to_string(), ShipmentStatus::Delivered)]
        );

        // Terminal records are not polled again
        let report = sync.sweep(Utc::now()).await;
        assert_eq!(report.polled, 0);
        assert_eq!(carrier.poll_count(), 1);
    }

    #[tokio::test]
    async fn test_unchanged_and_unmapped() {
        let (carrier, recorder, sync) = setup();
        sync.store().register("AWB1", "S-1", Utc::now()).unwrap();
        sync.store().register("AWB2", "S-2", Utc::now()).unwrap();
        carrier.set_status("AWB1", "Manifested", Utc::now());
        carrier.set_status("AWB2", "Held by customs", Utc::now());

        let report = sync.sweep(Utc::now()).await;
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.unmapped, 1);
        assert!(recorder.seen.lock().unwrap().is_empty());
        assert_eq!(sync.metrics().unmapped_total.get(), 1);
        assert_eq!(
            sync.store().get("AWB2").unwrap().current_status,
            ShipmentStatus::Booked
        );
    }

    #[tokio::test]
    async fn test_refresh_single_record() {
        let (carrier, _recorder, sync) = setup();
        sync.store().register("AWB1", "S-1", Utc::now()).unwrap();
        carrier.set_status("AWB1", "Picked Up", Utc::now());

        let record = sync.refresh("AWB1", Utc::now()).await.unwrap();
        assert_eq!(record.current_status, ShipmentStatus::PickedUp);
        assert!(sync.refresh("AWB9", Utc::now()).await.is_err());
    }
}
