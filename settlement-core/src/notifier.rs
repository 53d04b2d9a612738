//! Merchant notifications
//!
//! Delivery (email, websocket) lives outside this crate. The facade reports
//! what happened through a [`Notifier`]; the daemon logs it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;
use wallet_ledger::{MerchantId, Transaction};

/// Something a merchant should hear about
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Money left or entered the wallet
    WalletMovement {
        /// The ledger entry
        transaction: Transaction,
    },
    /// An invoice was finalized
    InvoiceIssued {
        /// Merchant billed
        merchant_id: MerchantId,
        /// Invoice
        invoice_id: Uuid,
        /// Human-readable number
        invoice_number: String,
        /// Amount due, rounded
        amount_due: Decimal,
        /// Due date
        due_date: DateTime<Utc>,
    },
    /// A closed cycle could not be invoiced
    InvoiceBlocked {
        /// Merchant
        merchant_id: MerchantId,
        /// Cycle label
        cycle: String,
        /// Why
        reason: String,
    },
}

impl Notification {
    /// Merchant the notification is for
    pub fn merchant_id(&self) -> &MerchantId {
        match self {
            Notification::WalletMovement { transaction } => &transaction.merchant_id,
            Notification::InvoiceIssued { merchant_id, .. }
            | Notification::InvoiceBlocked { merchant_id, .. } => merchant_id,
        }
    }
}

/// Outbound notification channel
pub trait Notifier: Send + Sync {
    /// Deliver, best effort. Must not block for long.
    fn notify(&self, notification: &Notification);
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: &Notification) {
        match notification {
            Notification::WalletMovement { transaction } => tracing::info!(
                merchant_id = %transaction.merchant_id,
                category = %transaction.category,
                amount = %transaction.amount,
                balance = %transaction.closing_balance,
                "Wallet updated"
            ),
            Notification::InvoiceIssued {
                merchant_id,
                invoice_number,
                amount_due,
                due_date,
                ..
            } => tracing::info!(
                merchant_id = %merchant_id,
                invoice_number = %invoice_number,
                amount_due = %amount_due,
                due_date = %due_date,
                "Invoice issued"
            ),
            Notification::InvoiceBlocked {
                merchant_id,
                cycle,
                reason,
            } => tracing::error!(
                merchant_id = %merchant_id,
                cycle = %cycle,
                reason = %reason,
                "Invoice blocked, operator action required"
            ),
        }
    }
}
