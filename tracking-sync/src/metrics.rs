//! Sweep metrics
//!
//! - `tracking_polls_total` - Carrier polls attempted
//! - `tracking_poll_failures_total` - Polls or handler calls that failed
//! - `tracking_transitions_total` - Status changes applied
//! - `tracking_unmapped_total` - Carrier strings with no mapping
//! - `tracking_sweep_duration_seconds` - Sweep wall time

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct SyncMetrics {
    /// Polls attempted
    pub polls_total: IntCounter,
    /// Failed polls
    pub poll_failures_total: IntCounter,
    /// Transitions applied
    pub transitions_total: IntCounter,
    /// Unmapped carrier statuses
    pub unmapped_total: IntCounter,
    /// Sweep duration
    pub sweep_duration: Histogram,
    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl SyncMetrics {
    /// Create collector on its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let polls_total = IntCounter::new("tracking_polls_total", "Carrier polls attempted")?;
        registry.register(Box::new(polls_total.clone()))?;

        let poll_failures_total =
            IntCounter::new("tracking_poll_failures_total", "Failed polls")?;
        registry.register(Box::new(poll_failures_total.clone()))?;

        let transitions_total =
            IntCounter::new("tracking_transitions_total", "Status changes applied")?;
        registry.register(Box::new(transitions_total.clone()))?;

        let unmapped_total =
            IntCounter::new("tracking_unmapped_total", "Carrier statuses with no mapping")?;
        registry.register(Box::new(unmapped_total.clone()))?;

        let sweep_duration = Histogram::with_opts(
            HistogramOpts::new("tracking_sweep_duration_seconds", "Sweep wall time")
                .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
        )?;
        registry.register(Box::new(sweep_duration.clone()))?;

        Ok(Self {
            polls_total,
            poll_failures_total,
            transitions_total,
            unmapped_total,
            sweep_duration,
            registry,
        })
    }

    /// Export in Prometheus text format
    pub fn export(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode tracking metrics: {}", e);
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
