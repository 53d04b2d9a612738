//! Wallet Ledger
//!
//! Append-only per-merchant transaction log for prepaid shipping wallets.
//!
//! # Architecture
//!
//! - **Append-only**: Entries are never modified or deleted; a reversal is a
//!   new credit that references the original
//! - **Derived balance**: The balance is the `closing_balance` of the latest
//!   entry, never a separately mutated counter
//! - **Per-merchant serialization**: The read-balance-then-append sequence
//!   runs under a per-merchant mutex; unrelated merchants never contend
//! - **Pluggable storage**: In-memory by default, RocksDB with the `rocksdb`
//!   feature
//!
//! # Invariants
//!
//! - `closing_balance == opening_balance + signed(amount)` for every entry
//! - `opening_balance[i + 1] == closing_balance[i]` per merchant
//! - A debit never takes the balance below zero

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod storage;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::{MerchantSession, WalletLedger};
pub use storage::{LedgerStore, MemoryStore};
pub use types::{EntrySide, MerchantId, Posting, ShipmentRef, Transaction, TransactionCategory};
