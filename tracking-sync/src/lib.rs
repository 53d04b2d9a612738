//! Shipment status synchronization
//!
//! Polls the carrier for every shipment still in flight, maps carrier status
//! strings onto [`billing::ShipmentStatus`] and hands each real transition to
//! a [`StatusEventHandler`]. A record stops being polled once it reaches a
//! terminal status.
//!
//! # Sweep
//!
//! ```text
//! active records ──poll (timeout)──▶ map ──changed?──▶ handler ──ok──▶ record
//!                        │             │                   │
//!                        ▼             ▼                   ▼
//!                     failure      unmapped             failure
//!                  (retry next)   (unchanged)        (retry next)
//! ```
//!
//! Sweeps never overlap; one that starts while another runs returns a
//! skipped [`SweepReport`].

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod carrier;
pub mod config;
pub mod error;
pub mod mapper;
pub mod metrics;
pub mod mock;
pub mod record;
pub mod sync;

pub use carrier::{CarrierClient, CarrierStatus, HttpCarrierClient, ServiceMode, ZoneQuery};
pub use config::Config;
pub use error::{Error, Result};
pub use mapper::StatusMapper;
pub use metrics::SyncMetrics;
pub use mock::MockCarrier;
pub use record::{PollFailure, StatusEvent, TrackingRecord, TrackingStore};
pub use sync::{StatusEventHandler, SweepReport, Synchronizer};
