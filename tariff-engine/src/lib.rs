//! Tariff Engine
//!
//! Converts a carrier-reported zone and a package's physical attributes into
//! the merchant's own shipping tariff.
//!
//! # Pricing ladder
//!
//! Every tier owns a forward table and a return-to-origin table. Both are
//! evaluated with the same checkpoint-plus-additive ladder:
//!
//! ```text
//!   0 ..= 250 g      flat
//! 251 ..= 500 g      flat
//! 501 ..= 4999 g     500 g price + one step per started 500 g
//!        5000 g      "upto 5 kg" checkpoint (table constant)
//! 5001 ..= 9999 g    checkpoint + one step per started 1000 g
//!       10000 g      "upto 10 kg" checkpoint (table constant)
//!     > 10000 g      checkpoint + one step per started 1000 g
//! ```
//!
//! # Invariants
//!
//! - Zones are canonicalized once, at ingestion ([`Zone::normalize`])
//! - Checkpoints are authoritative, never re-derived from the steps below
//! - No rounding happens here; callers round once when rendering

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod pricing;
pub mod table;
pub mod types;
pub mod zone;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use pricing::TariffBook;
pub use table::{CodRule, SlabKind, SlabRule, TariffTable, ZoneRates};
pub use types::{ChargeBreakdown, Dimensions, Direction, Tier};
pub use zone::Zone;
