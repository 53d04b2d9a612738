//! Core types for the wallet ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode in the RocksDB store)
//! - Exact arithmetic (Decimal for money)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tariff_engine::Zone;
use uuid::Uuid;

/// Merchant identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MerchantId(String);

impl MerchantId {
    /// Create new merchant ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MerchantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which way money moves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySide {
    /// Adds to the wallet
    Credit,
    /// Takes from the wallet
    Debit,
}

/// Why money moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionCategory {
    /// Merchant topped up the wallet
    Recharge,
    /// Forward freight + COD fee at order creation
    ShipmentCharge,
    /// Return-to-origin tariff
    RtoCharge,
    /// Reversal of an earlier charge
    Refund,
    /// Carrier re-weighed the package heavier than declared
    WeightDiscrepancy,
    /// Invoice correction in the merchant's favour
    CreditNote,
    /// Invoice correction against the merchant
    DebitNote,
}

impl TransactionCategory {
    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionCategory::Recharge => "recharge",
            TransactionCategory::ShipmentCharge => "shipment_charge",
            TransactionCategory::RtoCharge => "rto_charge",
            TransactionCategory::Refund => "refund",
            TransactionCategory::WeightDiscrepancy => "weight_discrepancy",
            TransactionCategory::CreditNote => "credit_note",
            TransactionCategory::DebitNote => "debit_note",
        }
    }
}

impl fmt::Display for TransactionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Link from a ledger entry to the shipment that caused it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentRef {
    /// Marketplace shipment id
    pub shipment_id: String,

    /// Carrier tracking id (waybill), once assigned
    pub tracking_id: Option<String>,

    /// Chargeable weight the charge was computed on
    pub weight_grams: u32,

    /// Canonical zone
    pub zone: Zone,
}

/// Immutable ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction ID (UUIDv7 for time-ordering)
    pub transaction_id: Uuid,

    /// Wallet owner
    pub merchant_id: MerchantId,

    /// Position in the merchant's chain, starting at 1
    pub sequence: u64,

    /// Credit or debit
    pub side: EntrySide,

    /// Magnitude, always positive
    pub amount: Decimal,

    /// Category
    pub category: TransactionCategory,

    /// Balance before this entry
    pub opening_balance: Decimal,

    /// Balance after this entry
    pub closing_balance: Decimal,

    /// Originating shipment
    pub shipment: Option<ShipmentRef>,

    /// Entry this one reverses or corrects
    pub reference_transaction_id: Option<Uuid>,

    /// Free-text description
    #[serde(default)]
    pub description: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Amount with its sign: positive for credits, negative for debits
    pub fn signed_amount(&self) -> Decimal {
        match self.side {
            EntrySide::Credit => self.amount,
            EntrySide::Debit => -self.amount,
        }
    }

    /// `closing == opening + signed(amount)`
    pub fn is_balanced(&self) -> bool {
        self.closing_balance == self.opening_balance + self.signed_amount()
    }
}

/// A requested ledger entry, before balances are known
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    /// Credit or debit
    pub side: EntrySide,

    /// Positive magnitude
    pub amount: Decimal,

    /// Category
    pub category: TransactionCategory,

    /// Originating shipment
    pub shipment: Option<ShipmentRef>,

    /// Referenced transaction
    pub reference_transaction_id: Option<Uuid>,

    /// Description
    pub description: String,
}

impl Posting {
    /// New debit posting
    pub fn debit(amount: Decimal, category: TransactionCategory) -> Self {
        Self::new(EntrySide::Debit, amount, category)
    }

    /// New credit posting
    pub fn credit(amount: Decimal, category: TransactionCategory) -> Self {
        Self::new(EntrySide::Credit, amount, category)
    }

    fn new(side: EntrySide, amount: Decimal, category: TransactionCategory) -> Self {
        Self {
            side,
            amount,
            category,
            shipment: None,
            reference_transaction_id: None,
            description: String::new(),
        }
    }

    /// Attach the originating shipment
    pub fn with_shipment(mut self, shipment: ShipmentRef) -> Self {
        self.shipment = Some(shipment);
        self
    }

    /// Reference another transaction
    pub fn with_reference(mut self, transaction_id: Uuid) -> Self {
        self.reference_transaction_id = Some(transaction_id);
        self
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}
