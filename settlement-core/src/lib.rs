//! Shipping settlement core
//!
//! Prices shipments, keeps each merchant's prepaid wallet, rolls charged
//! shipments into half-month billing cycles and turns closed cycles into
//! GST invoices. [`ShippingSettlement`] is the single entry point; the
//! `settlementd` binary runs its periodic sweeps.
//!
//! ```text
//!            quote ──▶ TariffBook
//!                          │
//! charge_shipment ──▶ WalletLedger debit + CycleAggregator (one unit)
//!                          ▲
//!   tracking sweep ──▶ status change ──▶ RTO charge / refund
//!                          │
//!    billing sweep ──▶ close cycles ──▶ InvoiceFinalizer ──▶ InvoiceBook
//! ```
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use rust_decimal::Decimal;
//! use settlement_core::{Config, MerchantProfile, ShipmentOrder, ShippingSettlement};
//! use tariff_engine::{Tier, Zone};
//! use wallet_ledger::MerchantId;
//!
//! # fn main() -> settlement_core::Result<()> {
//! let settlement = ShippingSettlement::open(Config::default())?;
//! let merchant = MerchantId::new("M-1001");
//! settlement.register_merchant(MerchantProfile {
//!     merchant_id: merchant.clone(),
//!     tier: Tier::new("basic"),
//!     billing_state: Some("KA".to_string()),
//!     pickup_state: Some("KA".to_string()),
//! })?;
//!
//! settlement.recharge(&merchant, Decimal::from(1000))?;
//! settlement.charge_shipment(&merchant, ShipmentOrder {
//!     shipment_id: "SHP-1".to_string(),
//!     tracking_id: None,
//!     zone: Zone::C,
//!     declared_weight_grams: 5000,
//!     dimensions: None,
//!     cod_amount: Decimal::ZERO,
//!     created_at: Utc::now(),
//! })?;
//!
//! assert_eq!(settlement.get_current_balance(&merchant)?, Decimal::from(630));
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

pub mod config;
pub mod error;
pub mod merchant;
pub mod notifier;
pub mod settlement;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use merchant::{MerchantProfile, MerchantRegistry};
pub use notifier::{Notification, Notifier, TracingNotifier};
pub use settlement::{BillingSweepReport, ShipmentOrder, ShippingSettlement};
