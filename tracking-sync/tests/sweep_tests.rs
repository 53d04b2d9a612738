//! Sweep behaviour against the scripted carrier

use billing::ShipmentStatus;
use chrono::{TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracking_sync::{
    Config, Error, MockCarrier, Result, StatusEvent, StatusEventHandler, Synchronizer,
    TrackingRecord, TrackingStore,
};

/// Refuses the first `refusals` transitions, then accepts
#[derive(Default)]
struct FlakyHandler {
    refusals: AtomicUsize,
    accepted: AtomicUsize,
}

impl StatusEventHandler for FlakyHandler {
    fn on_status(&self, _record: &TrackingRecord, _event: &StatusEvent) -> Result<()> {
        let left = self.refusals.load(Ordering::SeqCst);
        if left > 0 {
            self.refusals.store(left - 1, Ordering::SeqCst);
            return Err(Error::InvalidResponse("ledger refused".to_string()));
        }
        self.accepted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn synchronizer(carrier: &MockCarrier, handler: Arc<FlakyHandler>, config: &Config) -> Synchronizer {
    Synchronizer::new(
        Arc::new(carrier.clone()),
        handler,
        Arc::new(TrackingStore::new()),
        config,
    )
    .unwrap()
}

#[tokio::test]
async fn test_terminal_records_leave_the_sweep() {
    let carrier = MockCarrier::new();
    let handler = Arc::new(FlakyHandler::default());
    let sync = synchronizer(&carrier, handler.clone(), &Config::default());
    let at = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();

    for (awb, status) in [("AWB1", "In Transit"), ("AWB2", "RTO Delivered"), ("AWB3", "Lost")] {
        sync.store().register(awb, &format!("S-{}", awb), at).unwrap();
        carrier.set_status(awb, status, at);
    }

    let first = sync.sweep(at).await;
    assert_eq!(first.polled, 3);
    assert_eq!(first.transitions, 3);
    assert_eq!(first.deactivated, 2);

    let second = sync.sweep(at).await;
    assert_eq!(second.polled, 1);
    assert_eq!(second.unchanged, 1);

    // A later status for a terminal waybill is never seen
    carrier.set_status("AWB2", "Delivered", at);
    sync.sweep(at).await;
    assert_eq!(
        sync.store().get("AWB2").unwrap().current_status,
        ShipmentStatus::RtoDelivered
    );
    assert_eq!(carrier.poll_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_a_transient_failure() {
    let carrier = MockCarrier::new();
    let handler = Arc::new(FlakyHandler::default());
    let config = Config {
        poll_timeout_ms: 1_000,
        ..Config::default()
    };
    let sync = synchronizer(&carrier, handler.clone(), &config);
    let at = Utc::now();

    sync.store().register("SLOW", "S-1", at).unwrap();
    sync.store().register("FAST", "S-2", at).unwrap();
    carrier.set_status("SLOW", "Delivered", at);
    carrier.set_status("FAST", "Picked Up", at);
    carrier.delay("SLOW", Duration::from_secs(30));

    let report = sync.sweep(at).await;
    assert_eq!(report.failures, 1);
    assert_eq!(report.transitions, 1);

    let slow = sync.store().get("SLOW").unwrap();
    assert!(slow.active);
    assert_eq!(slow.consecutive_failures, 1);
    assert!(slow.last_failure.unwrap().message.contains("timed out"));

    // The carrier recovers; the next sweep picks it up
    carrier.delay("SLOW", Duration::ZERO);
    let report = sync.sweep(at).await;
    assert_eq!(report.deactivated, 1);
    assert!(!sync.store().get("SLOW").unwrap().active);
}

#[tokio::test]
async fn test_carrier_error_does_not_abort_sweep() {
    let carrier = MockCarrier::new();
    let handler = Arc::new(FlakyHandler::default());
    let sync = synchronizer(&carrier, handler.clone(), &Config::default());
    let at = Utc::now();

    for i in 0..10 {
        let awb = format!("AWB{}", i);
        sync.store().register(&awb, &format!("S-{}", i), at).unwrap();
        carrier.set_status(&awb, "Out For Delivery", at);
    }
    carrier.fail("AWB3", true);
    carrier.fail("AWB7", true);

    let report = sync.sweep(at).await;
    assert_eq!(report.polled, 10);
    assert_eq!(report.failures, 2);
    assert_eq!(report.transitions, 8);
    assert_eq!(sync.metrics().poll_failures_total.get(), 2);
}

#[tokio::test]
async fn test_refused_transition_is_retried() {
    let carrier = MockCarrier::new();
    let handler = Arc::new(FlakyHandler {
        refusals: AtomicUsize::new(1),
        accepted: AtomicUsize::new(0),
    });
    let sync = synchronizer(&carrier, handler.clone(), &Config::default());
    let at = Utc::now();

    sync.store().register("AWB1", "S-1", at).unwrap();
    carrier.set_status("AWB1", "RTO Initiated", at);

    let report = sync.sweep(at).await;
    assert_eq!(report.failures, 1);
    let record = sync.store().get("AWB1").unwrap();
    assert_eq!(record.current_status, ShipmentStatus::Booked);
    assert!(record.history.is_empty());

    let report = sync.sweep(at).await;
    assert_eq!(report.transitions, 1);
    assert_eq!(handler.accepted.load(Ordering::SeqCst), 1);
    let record = sync.store().get("AWB1").unwrap();
    assert_eq!(record.current_status, ShipmentStatus::RtoInitiated);
    assert_eq!(record.consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_sweep_is_skipped() {
    let carrier = MockCarrier::new();
    let handler = Arc::new(FlakyHandler::default());
    let sync = Arc::new(synchronizer(&carrier, handler, &Config::default()));
    let at = Utc::now();

    sync.store().register("AWB1", "S-1", at).unwrap();
    carrier.set_status("AWB1", "In Transit", at);
    carrier.delay("AWB1", Duration::from_secs(5));

    let running = {
        let sync = Arc::clone(&sync);
        tokio::spawn(async move { sync.sweep(at).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(sync.sweep(at).await.skipped);
    let first = running.await.unwrap();
    assert!(!first.skipped);
    assert_eq!(first.transitions, 1);
}
