//! Main ledger orchestration layer
//!
//! Ties storage and metrics together behind the debit/credit API.
//!
//! # Example
//!
//! ```
//! use rust_decimal::Decimal;
//! use wallet_ledger::{MerchantId, TransactionCategory, WalletLedger};
//!
//! # fn main() -> wallet_ledger::Result<()> {
//! let ledger = WalletLedger::in_memory()?;
//! let merchant = MerchantId::new("M-1001");
//!
//! ledger.credit(&merchant, Decimal::from(500), TransactionCategory::Recharge, None)?;
//! ledger.debit(&merchant, Decimal::from(120), TransactionCategory::ShipmentCharge, None)?;
//!
//! assert_eq!(ledger.balance(&merchant)?, Decimal::from(380));
//! # Ok(())
//! # }
//! ```

use crate::{
    metrics::LedgerMetrics,
    storage::{open_store, LedgerStore, MemoryStore},
    types::{EntrySide, MerchantId, Posting, ShipmentRef, Transaction, TransactionCategory},
    Config, Error, Result,
};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Main ledger interface
pub struct WalletLedger {
    /// Transaction store
    store: Arc<dyn LedgerStore>,

    /// One mutex per merchant serializing read-balance-then-append
    locks: DashMap<MerchantId, Arc<Mutex<()>>>,

    /// Metrics
    metrics: LedgerMetrics,
}

impl std::fmt::Debug for WalletLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletLedger")
            .field("merchants_locked", &self.locks.len())
            .finish()
    }
}

/// Access to one merchant's wallet while its lock is held.
///
/// Obtained only through [`WalletLedger::with_merchant_lock`].
pub struct MerchantSession<'a> {
    ledger: &'a WalletLedger,
    merchant: &'a MerchantId,
}

impl std::fmt::Debug for MerchantSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerchantSession")
            .field("merchant", self.merchant)
            .finish()
    }
}

impl MerchantSession<'_> {
    /// Current balance
    pub fn balance(&self) -> Result<Decimal> {
        self.ledger.balance_unlocked(self.merchant)
    }

    /// Append a posting
    pub fn post(&mut self, posting: Posting) -> Result<Transaction> {
        self.ledger.post_unlocked(self.merchant, posting)
    }

    /// Whether a refund referencing `transaction_id` exists
    pub fn is_reversed(&self, transaction_id: Uuid) -> Result<bool> {
        Ok(self
            .ledger
            .store
            .history(self.merchant)?
            .iter()
            .any(|tx| {
                tx.category == TransactionCategory::Refund
                    && tx.reference_transaction_id == Some(transaction_id)
            }))
    }
}

impl WalletLedger {
    /// Create ledger over a store
    pub fn new(store: Arc<dyn LedgerStore>) -> Result<Self> {
        Ok(Self {
            store,
            locks: DashMap::new(),
            metrics: LedgerMetrics::new()?,
        })
    }

    /// Create ledger with an in-memory store
    pub fn in_memory() -> Result<Self> {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Open ledger with configuration
    pub fn open(config: &Config) -> Result<Self> {
        let store = open_store(config)?;
        tracing::info!(backend = ?config.backend, "Wallet ledger opened");
        Self::new(store)
    }

    /// Metrics collector
    pub fn metrics(&self) -> &LedgerMetrics {
        &self.metrics
    }

    fn merchant_lock(&self, merchant: &MerchantId) -> Arc<Mutex<()>> {
        self.locks
            .entry(merchant.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `f` while holding the merchant's lock.
    ///
    /// Everything `f` posts through the session is serialized against every
    /// other debit or credit for the same merchant.
    pub fn with_merchant_lock<T>(
        &self,
        merchant: &MerchantId,
        f: impl FnOnce(&mut MerchantSession<'_>) -> Result<T>,
    ) -> Result<T> {
        let lock = self.merchant_lock(merchant);
        let _guard = lock.lock();

        let mut session = MerchantSession {
            ledger: self,
            merchant,
        };
        f(&mut session)
    }

    /// Append a posting under the merchant's lock
    pub fn post(&self, merchant: &MerchantId, posting: Posting) -> Result<Transaction> {
        self.with_merchant_lock(merchant, |session| session.post(posting))
    }

    /// Debit the wallet. Refused with `InsufficientBalance` when
    /// `amount > balance`.
    pub fn debit(
        &self,
        merchant: &MerchantId,
        amount: Decimal,
        category: TransactionCategory,
        shipment: Option<ShipmentRef>,
    ) -> Result<Transaction> {
        let mut posting = Posting::debit(amount, category);
        posting.shipment = shipment;
        self.post(merchant, posting)
    }

    /// Credit the wallet
    pub fn credit(
        &self,
        merchant: &MerchantId,
        amount: Decimal,
        category: TransactionCategory,
        reference: Option<Uuid>,
    ) -> Result<Transaction> {
        let mut posting = Posting::credit(amount, category);
        posting.reference_transaction_id = reference;
        self.post(merchant, posting)
    }

    /// Reverse a debit with a refund credit that references it.
    ///
    /// The original entry is left untouched. A second reversal of the same
    /// entry is refused with `AlreadyReversed`.
    pub fn reverse(&self, transaction_id: Uuid, description: &str) -> Result<Transaction> {
        let original = self.transaction(transaction_id)?;

        if original.side != EntrySide::Debit {
            return Err(Error::InvalidInput(format!(
                "Only debits can be reversed, {} is a credit",
                transaction_id
            )));
        }

        self.with_merchant_lock(&original.merchant_id, |session| {
            if session.is_reversed(transaction_id)? {
                return Err(Error::AlreadyReversed(transaction_id.to_string()));
            }

            let mut posting = Posting::credit(original.amount, TransactionCategory::Refund)
                .with_reference(transaction_id)
                .with_description(description);
            posting.shipment = original.shipment.clone();

            session.post(posting)
        })
    }

    /// Current balance: closing balance of the latest entry, zero if none
    pub fn balance(&self, merchant: &MerchantId) -> Result<Decimal> {
        self.balance_unlocked(merchant)
    }

    /// All entries for a merchant, oldest first
    pub fn history(&self, merchant: &MerchantId) -> Result<Vec<Transaction>> {
        self.store.history(merchant)
    }

    /// Entry by ID
    pub fn transaction(&self, transaction_id: Uuid) -> Result<Transaction> {
        self.store
            .get(transaction_id)?
            .ok_or_else(|| Error::TransactionNotFound(transaction_id.to_string()))
    }

    /// Whether a refund referencing `transaction_id` exists
    pub fn is_reversed(&self, transaction_id: Uuid) -> Result<bool> {
        let original = self.transaction(transaction_id)?;
        self.with_merchant_lock(&original.merchant_id, |session| {
            session.is_reversed(transaction_id)
        })
    }

    /// Re-check the balance chain for a merchant
    pub fn verify_chain(&self, merchant: &MerchantId) -> Result<()> {
        let history = self.store.history(merchant)?;

        let mut previous: Option<&Transaction> = None;
        for tx in &history {
            if !tx.is_balanced() {
                return Err(Error::InvariantViolation(format!(
                    "Transaction {} does not balance: {} {:+} != {}",
                    tx.transaction_id,
                    tx.opening_balance,
                    tx.signed_amount(),
                    tx.closing_balance
                )));
            }

            let expected_opening = previous.map_or(Decimal::ZERO, |p| p.closing_balance);
            if tx.opening_balance != expected_opening {
                return Err(Error::InvariantViolation(format!(
                    "Transaction {} opens at {} but previous entry closed at {}",
                    tx.transaction_id, tx.opening_balance, expected_opening
                )));
            }

            if tx.closing_balance < Decimal::ZERO {
                return Err(Error::InvariantViolation(format!(
                    "Transaction {} closes below zero ({})",
                    tx.transaction_id, tx.closing_balance
                )));
            }

            previous = Some(tx);
        }

        Ok(())
    }

    fn balance_unlocked(&self, merchant: &MerchantId) -> Result<Decimal> {
        Ok(self
            .store
            .latest(merchant)?
            .map_or(Decimal::ZERO, |tx| tx.closing_balance))
    }

    // Caller must hold the merchant lock
    fn post_unlocked(&self, merchant: &MerchantId, posting: Posting) -> Result<Transaction> {
        if posting.amount <= Decimal::ZERO {
            return Err(Error::InvalidInput(format!(
                "Amount must be positive, got {}",
                posting.amount
            )));
        }

        let latest = self.store.latest(merchant)?;
        let opening_balance = latest.as_ref().map_or(Decimal::ZERO, |tx| tx.closing_balance);
        let sequence = latest.as_ref().map_or(1, |tx| tx.sequence + 1);

        let closing_balance = match posting.side {
            EntrySide::Credit => opening_balance + posting.amount,
            EntrySide::Debit => {
                if posting.amount > opening_balance {
                    self.metrics.refused_debits_total.inc();
                    tracing::warn!(
                        merchant_id = %merchant,
                        required = %posting.amount,
                        available = %opening_balance,
                        category = %posting.category,
                        "Debit refused"
                    );
                    return Err(Error::InsufficientBalance {
                        merchant_id: merchant.to_string(),
                        required: posting.amount,
                        available: opening_balance,
                    });
                }
                opening_balance - posting.amount
            }
        };

        let tx = Transaction {
            transaction_id: Uuid::now_v7(),
            merchant_id: merchant.clone(),
            sequence,
            side: posting.side,
            amount: posting.amount,
            category: posting.category,
            opening_balance,
            closing_balance,
            shipment: posting.shipment,
            reference_transaction_id: posting.reference_transaction_id,
            description: posting.description,
            created_at: Utc::now(),
        };

        self.store.append(&tx)?;

        match tx.side {
            EntrySide::Credit => self.metrics.credits_total.inc(),
            EntrySide::Debit => {
                self.metrics.debits_total.inc();
                self.metrics
                    .debit_amount
                    .observe(tx.amount.to_f64().unwrap_or_default());
            }
        }

        tracing::debug!(
            transaction_id = %tx.transaction_id,
            merchant_id = %merchant,
            category = %tx.category,
            amount = %tx.signed_amount(),
            closing_balance = %tx.closing_balance,
            "Transaction appended"
        );

        Ok(tx)
    }
}
