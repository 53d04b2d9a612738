//! Billing
//!
//! Rolls charged shipments into fixed half-month cycles per merchant and
//! turns closed cycles into tax-compliant invoices.
//!
//! # Lifecycle
//!
//! ```text
//! open ──(period end passed)──▶ closed ──(invoice finalized)──▶ invoiced
//! ```
//!
//! 1. **Charge**: [`CycleAggregator::charge_shipment`] prices the shipment,
//!    debits the wallet and admits it to the cycle covering its creation
//!    date, as one unit
//! 2. **Track**: [`CycleAggregator::on_status_change`] moves counters
//!    between outcome buckets and posts RTO charges or cancellation refunds
//! 3. **Close**: [`CycleAggregator::close_expired_cycles`] freezes every
//!    cycle whose period is over; repeat calls are no-ops
//! 4. **Invoice**: [`InvoiceFinalizer::finalize`] applies CGST + SGST or
//!    IGST and produces an immutable [`Invoice`]
//!
//! # Example
//!
//! ```
//! use billing::{CycleAggregator, Shipment};
//! use chrono::Utc;
//! use rust_decimal::Decimal;
//! use std::sync::Arc;
//! use tariff_engine::{TariffBook, Tier, Zone};
//! use wallet_ledger::{MerchantId, TransactionCategory, WalletLedger};
//!
//! # fn main() -> billing::Result<()> {
//! let ledger = Arc::new(WalletLedger::in_memory()?);
//! let merchant = MerchantId::new("M-1001");
//! ledger.credit(&merchant, Decimal::from(1000), TransactionCategory::Recharge, None)?;
//!
//! let aggregator = CycleAggregator::new(ledger, Arc::new(TariffBook::standard()));
//! let charge = aggregator.charge_shipment(&Shipment {
//!     shipment_id: "SHP-1".to_string(),
//!     merchant_id: merchant,
//!     tier: Tier::new("basic"),
//!     tracking_id: None,
//!     zone: Zone::C,
//!     declared_weight_grams: 5000,
//!     dimensions: None,
//!     cod_amount: Decimal::ZERO,
//!     created_at: Utc::now(),
//! })?;
//!
//! assert_eq!(charge.transaction.amount, Decimal::from(370));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod aggregator;
pub mod book;
pub mod config;
pub mod cycle;
pub mod error;
pub mod invoice;
pub mod scheduler;
pub mod types;

// Re-exports
pub use aggregator::{CycleAggregator, ShipmentCharge, StatusChange};
pub use book::InvoiceBook;
pub use config::Config;
pub use cycle::{BillingCycle, ChargeLine, CycleKey, CycleStatus, CycleSummary, LineKind, ShipmentEntry};
pub use error::{Error, Result};
pub use invoice::{
    round_money, AdjustmentNote, Invoice, InvoiceFinalizer, InvoiceSummary, NoteKind, PaymentInfo,
    PaymentStatus, TaxBreakdown, TaxRegime,
};
pub use scheduler::{spawn_periodic, SweepGuard, SweepPermit};
pub use types::{Outcome, PaymentMode, Shipment, ShipmentStatus};
