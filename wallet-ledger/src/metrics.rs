//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `wallet_debits_total` - Debits appended
//! - `wallet_credits_total` - Credits appended
//! - `wallet_refused_debits_total` - Debits refused for insufficient balance
//! - `wallet_debit_amount` - Histogram of debit amounts

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct LedgerMetrics {
    /// Debits appended
    pub debits_total: IntCounter,

    /// Credits appended
    pub credits_total: IntCounter,

    /// Debits refused
    pub refused_debits_total: IntCounter,

    /// Debit amount histogram
    pub debit_amount: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl LedgerMetrics {
    /// Create new metrics collector on its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let debits_total = IntCounter::new("wallet_debits_total", "Debits appended")?;
        registry.register(Box::new(debits_total.clone()))?;

        let credits_total = IntCounter::new("wallet_credits_total", "Credits appended")?;
        registry.register(Box::new(credits_total.clone()))?;

        let refused_debits_total = IntCounter::new(
            "wallet_refused_debits_total",
            "Debits refused for insufficient balance",
        )?;
        registry.register(Box::new(refused_debits_total.clone()))?;

        let debit_amount = Histogram::with_opts(
            HistogramOpts::new("wallet_debit_amount", "Histogram of debit amounts").buckets(vec![
                25.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0,
            ]),
        )?;
        registry.register(Box::new(debit_amount.clone()))?;

        Ok(Self {
            debits_total,
            credits_total,
            refused_debits_total,
            debit_amount,
            registry,
        })
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("Failed to encode ledger metrics: {}", e);
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
