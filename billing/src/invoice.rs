//! Invoice finalization
//!
//! An invoice is built from exactly one closed cycle. Amounts accumulate at
//! full precision and are rounded half away from zero to two places only
//! when rendered. After finalization only the payment fields change;
//! corrections are separate [`AdjustmentNote`]s.

use crate::{
    cycle::{BillingCycle, ChargeLine, CycleKey, CycleStatus, CycleSummary},
    Config, Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wallet_ledger::MerchantId;

/// Round for display and payment comparison
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Which GST components apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxRegime {
    /// Pickup and billing in the same state: CGST + SGST
    IntraState,
    /// Different states: IGST
    InterState,
}

/// Tax on an invoice subtotal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxBreakdown {
    /// Combined rate
    pub rate: Decimal,
    /// Regime
    pub regime: TaxRegime,
    /// Central GST
    pub cgst_amount: Decimal,
    /// State GST
    pub sgst_amount: Decimal,
    /// Integrated GST
    pub igst_amount: Decimal,
}

impl TaxBreakdown {
    /// Split `subtotal × rate` by regime
    pub fn compute(subtotal: Decimal, rate: Decimal, regime: TaxRegime) -> Self {
        let tax = subtotal * rate;
        match regime {
            TaxRegime::IntraState => {
                let cgst = tax / Decimal::TWO;
                Self {
                    rate,
                    regime,
                    cgst_amount: cgst,
                    sgst_amount: tax - cgst,
                    igst_amount: Decimal::ZERO,
                }
            }
            TaxRegime::InterState => Self {
                rate,
                regime,
                cgst_amount: Decimal::ZERO,
                sgst_amount: Decimal::ZERO,
                igst_amount: tax,
            },
        }
    }

    /// Sum of all components
    pub fn total(&self) -> Decimal {
        self.cgst_amount + self.sgst_amount + self.igst_amount
    }
}

/// Payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Nothing paid, not yet due
    Pending,
    /// Some paid, not yet due
    PartiallyPaid,
    /// Settled; final
    Paid,
    /// Past due and not settled
    Overdue,
}

/// A payment against an invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInfo {
    /// Amount received
    pub amount: Decimal,
    /// Bank or gateway reference
    pub reference: String,
    /// When it was received
    pub paid_at: DateTime<Utc>,
}

/// Finalized invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    /// Invoice ID
    pub invoice_id: Uuid,
    /// `INV-<merchant>-<YYYYMM>-C<n>`
    pub invoice_number: String,
    /// Merchant
    pub merchant_id: MerchantId,
    /// Source cycle
    pub cycle: CycleKey,
    /// Period start
    pub period_start: DateTime<Utc>,
    /// Period end (exclusive)
    pub period_end: DateTime<Utc>,
    /// Registered billing state
    pub billing_state: String,
    /// Pickup-origin state
    pub pickup_state: String,
    /// Per-shipment charge lines
    pub lines: Vec<ChargeLine>,
    /// Frozen cycle summary
    pub summary: CycleSummary,
    /// Net charges, full precision
    pub subtotal: Decimal,
    /// Tax
    pub tax: TaxBreakdown,
    /// Subtotal plus tax, full precision
    pub grand_total: Decimal,
    /// When finalized
    pub issued_at: DateTime<Utc>,
    /// Payment due
    pub due_date: DateTime<Utc>,
    /// Payment status
    pub payment_status: PaymentStatus,
    /// Received so far
    pub amount_paid: Decimal,
    /// Payments received
    pub payments: Vec<PaymentInfo>,
}

/// Rounded view for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceSummary {
    /// Invoice ID
    pub invoice_id: Uuid,
    /// Number
    pub invoice_number: String,
    /// Period start
    pub period_start: DateTime<Utc>,
    /// Period end (exclusive)
    pub period_end: DateTime<Utc>,
    /// Subtotal, rounded
    pub subtotal: Decimal,
    /// Tax, rounded
    pub tax: Decimal,
    /// Grand total, rounded
    pub grand_total: Decimal,
    /// Received so far
    pub amount_paid: Decimal,
    /// Payment status
    pub payment_status: PaymentStatus,
    /// Due date
    pub due_date: DateTime<Utc>,
}

impl Invoice {
    /// Grand total as billed
    pub fn amount_due(&self) -> Decimal {
        round_money(self.grand_total)
    }

    /// Outstanding amount, never negative
    pub fn balance_due(&self) -> Decimal {
        (self.amount_due() - self.amount_paid).max(Decimal::ZERO)
    }

    /// Rounded view
    pub fn summary_view(&self) -> InvoiceSummary {
        InvoiceSummary {
            invoice_id: self.invoice_id,
            invoice_number: self.invoice_number.clone(),
            period_start: self.period_start,
            period_end: self.period_end,
            subtotal: round_money(self.subtotal),
            tax: round_money(self.tax.total()),
            grand_total: self.amount_due(),
            amount_paid: self.amount_paid,
            payment_status: self.payment_status,
            due_date: self.due_date,
        }
    }

    /// Recompute payment status at `now`.
    ///
    /// Status only moves forward: `Paid` is final and `Overdue` can only
    /// become `Paid`, whatever `now` says.
    pub fn refresh_status(&mut self, now: DateTime<Utc>) -> PaymentStatus {
        let settled =
            self.amount_due() >= Decimal::ZERO && self.amount_paid >= self.amount_due();

        self.payment_status = match self.payment_status {
            PaymentStatus::Paid => PaymentStatus::Paid,
            _ if settled => PaymentStatus::Paid,
            PaymentStatus::Overdue => PaymentStatus::Overdue,
            _ if now > self.due_date => PaymentStatus::Overdue,
            _ if self.amount_paid > Decimal::ZERO => PaymentStatus::PartiallyPaid,
            _ => PaymentStatus::Pending,
        };
        self.payment_status
    }

    /// Record a payment and refresh the status
    pub fn apply_payment(&mut self, payment: PaymentInfo) -> Result<PaymentStatus> {
        if self.payment_status == PaymentStatus::Paid {
            return Err(Error::InvoiceAlreadyPaid(self.invoice_number.clone()));
        }
        if payment.amount <= Decimal::ZERO {
            return Err(Error::InvalidInput(format!(
                "Payment amount must be positive, got {}",
                payment.amount
            )));
        }

        self.amount_paid += payment.amount;
        let paid_at = payment.paid_at;
        self.payments.push(payment);
        Ok(self.refresh_status(paid_at))
    }
}

/// Credit or debit note direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    /// Reduces what the merchant owes
    Credit,
    /// Increases what the merchant owes
    Debit,
}

/// Correction referencing a finalized invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentNote {
    /// Note ID
    pub note_id: Uuid,
    /// `CN-…` or `DN-…` followed by the invoice number and a sequence
    pub note_number: String,
    /// Corrected invoice
    pub invoice_id: Uuid,
    /// Direction
    pub kind: NoteKind,
    /// Positive amount
    pub amount: Decimal,
    /// Why
    pub reason: String,
    /// Wallet entry that applied the note, if any
    pub transaction_id: Option<Uuid>,
    /// When issued
    pub issued_at: DateTime<Utc>,
}

fn state_code(raw: Option<&str>, which: &str, merchant: &MerchantId) -> Result<String> {
    match raw.map(str::trim) {
        Some(code) if !code.is_empty() => Ok(code.to_ascii_uppercase()),
        _ => Err(Error::TaxConfiguration(format!(
            "Merchant {} has no {} state code",
            merchant, which
        ))),
    }
}

/// Turns closed cycles into invoices
#[derive(Debug, Clone)]
pub struct InvoiceFinalizer {
    tax_rate: Decimal,
    due_days: i64,
}

impl InvoiceFinalizer {
    /// Create finalizer
    pub fn new(config: &Config) -> Self {
        Self {
            tax_rate: config.tax_rate,
            due_days: config.due_days,
        }
    }

    /// Invoice number for a cycle
    pub fn invoice_number(key: &CycleKey) -> String {
        format!("INV-{}-{}", key.merchant_id, key.period_label())
    }

    /// Build the invoice for a closed cycle.
    ///
    /// Missing state codes fail with `TaxConfiguration`. A cycle whose lines
    /// net below zero is never invoiced.
    pub fn finalize(
        &self,
        cycle: &BillingCycle,
        billing_state: Option<&str>,
        pickup_state: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Invoice> {
        if cycle.status != CycleStatus::Closed {
            return Err(Error::CycleNotClosed(cycle.key.to_string()));
        }

        let merchant = &cycle.key.merchant_id;
        let billing_state = state_code(billing_state, "billing", merchant)?;
        let pickup_state = state_code(pickup_state, "pickup", merchant)?;

        let regime = if billing_state == pickup_state {
            TaxRegime::IntraState
        } else {
            TaxRegime::InterState
        };

        let subtotal = cycle.summary.subtotal();
        if subtotal < Decimal::ZERO {
            return Err(Error::NegativeSubtotal(cycle.key.to_string()));
        }
        let tax = TaxBreakdown::compute(subtotal, self.tax_rate, regime);
        let grand_total = subtotal + tax.total();

        let mut invoice = Invoice {
            invoice_id: Uuid::now_v7(),
            invoice_number: Self::invoice_number(&cycle.key),
            merchant_id: merchant.clone(),
            cycle: cycle.key.clone(),
            period_start: cycle.period_start,
            period_end: cycle.period_end,
            billing_state,
            pickup_state,
            lines: cycle.lines.clone(),
            summary: cycle.summary.clone(),
            subtotal,
            tax,
            grand_total,
            issued_at: now,
            due_date: cycle.period_end + Duration::days(self.due_days),
            payment_status: PaymentStatus::Pending,
            amount_paid: Decimal::ZERO,
            payments: Vec::new(),
        };
        invoice.refresh_status(now);

        tracing::info!(
            invoice_number = %invoice.invoice_number,
            subtotal = %invoice.subtotal,
            grand_total = %invoice.amount_due(),
            regime = ?regime,
            "Invoice finalized"
        );

        Ok(invoice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn closed_cycle(subtotal: Decimal) -> BillingCycle {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
        let mut cycle = BillingCycle::open(CycleKey::for_date(&MerchantId::new("M-7"), at)).unwrap();
        cycle.summary.forward_charges = subtotal;
        cycle.status = CycleStatus::Closed;
        cycle
    }

    fn finalizer() -> InvoiceFinalizer {
        InvoiceFinalizer::new(&Config::default())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 16, 1, 0, 0).unwrap()
    }

    #[test]
    fn test_intra_state_split() {
        let cycle = closed_cycle(dec!(1234.567));
        let invoice = finalizer()
            .finalize(&cycle, Some("KA"), Some(" ka "), now())
            .unwrap();

        assert_eq!(invoice.tax.regime, TaxRegime::IntraState);
        assert_eq!(invoice.tax.igst_amount, Decimal::ZERO);
        assert_eq!(
            invoice.tax.cgst_amount + invoice.tax.sgst_amount,
            dec!(1234.567) * dec!(0.18)
        );
        assert_eq!(invoice.tax.cgst_amount, invoice.tax.sgst_amount);
        assert_eq!(invoice.invoice_number, "INV-M-7-202403-C1");
    }

    #[test]
    fn test_inter_state_igst() {
        let cycle = closed_cycle(dec!(1000));
        let invoice = finalizer()
            .finalize(&cycle, Some("KA"), Some("MH"), now())
            .unwrap();

        assert_eq!(invoice.tax.cgst_amount, Decimal::ZERO);
        assert_eq!(invoice.tax.sgst_amount, Decimal::ZERO);
        assert_eq!(invoice.tax.igst_amount, dec!(180));
        assert_eq!(invoice.grand_total, dec!(1180));
    }

    #[test]
    fn test_missing_state_blocks_finalization() {
        let cycle = closed_cycle(dec!(1000));
        let err = finalizer().finalize(&cycle, Some("KA"), None, now()).unwrap_err();
        assert!(matches!(err, Error::TaxConfiguration(_)));

        let err = finalizer().finalize(&cycle, Some("  "), Some("KA"), now()).unwrap_err();
        assert!(matches!(err, Error::TaxConfiguration(_)));
    }

    #[test]
    fn test_open_cycle_rejected() {
        let mut cycle = closed_cycle(dec!(10));
        cycle.status = CycleStatus::Open;
        assert!(matches!(
            finalizer().finalize(&cycle, Some("KA"), Some("KA"), now()),
            Err(Error::CycleNotClosed(_))
        ));
    }

    #[test]
    fn test_rounds_once_at_render() {
        // 0.125 * 1.18 = 0.1475 → 0.15 half-up
        let cycle = closed_cycle(dec!(0.125));
        let invoice = finalizer()
            .finalize(&cycle, Some("KA"), Some("MH"), now())
            .unwrap();

        assert_eq!(invoice.grand_total, dec!(0.1475));
        assert_eq!(invoice.amount_due(), dec!(0.15));
        assert_eq!(round_money(dec!(2.345)), dec!(2.35));
        assert_eq!(round_money(dec!(-2.345)), dec!(-2.35));
    }

    #[test]
    fn test_payment_status_transitions() {
        let cycle = closed_cycle(dec!(100));
        let mut invoice = finalizer()
            .finalize(&cycle, Some("KA"), Some("KA"), now())
            .unwrap();
        assert_eq!(invoice.payment_status, PaymentStatus::Pending);
        assert_eq!(invoice.due_date, Utc.with_ymd_and_hms(2024, 3, 23, 0, 0, 0).unwrap());

        let status = invoice
            .apply_payment(PaymentInfo {
                amount: dec!(50),
                reference: "UTR-1".to_string(),
                paid_at: now(),
            })
            .unwrap();
        assert_eq!(status, PaymentStatus::PartiallyPaid);

        let late = Utc.with_ymd_and_hms(2024, 3, 25, 0, 0, 0).unwrap();
        assert_eq!(invoice.refresh_status(late), PaymentStatus::Overdue);

        let status = invoice
            .apply_payment(PaymentInfo {
                amount: dec!(68),
                reference: "UTR-2".to_string(),
                paid_at: late,
            })
            .unwrap();
        assert_eq!(status, PaymentStatus::Paid);
        assert_eq!(invoice.balance_due(), Decimal::ZERO);

        let err = invoice
            .apply_payment(PaymentInfo {
                amount: dec!(1),
                reference: "UTR-3".to_string(),
                paid_at: late,
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvoiceAlreadyPaid(_)));
    }

    #[test]
    fn test_overdue_survives_backdated_partial_payment() {
        let cycle = closed_cycle(dec!(100));
        let mut invoice = finalizer()
            .finalize(&cycle, Some("KA"), Some("KA"), now())
            .unwrap();

        let swept = Utc.with_ymd_and_hms(2024, 3, 30, 0, 0, 0).unwrap();
        assert_eq!(invoice.refresh_status(swept), PaymentStatus::Overdue);

        let status = invoice
            .apply_payment(PaymentInfo {
                amount: dec!(1),
                reference: "UTR-9".to_string(),
                paid_at: Utc.with_ymd_and_hms(2024, 3, 20, 0, 0, 0).unwrap(),
            })
            .unwrap();
        assert_eq!(status, PaymentStatus::Overdue);
        assert_eq!(invoice.refresh_status(now()), PaymentStatus::Overdue);

        let status = invoice
            .apply_payment(PaymentInfo {
                amount: dec!(117),
                reference: "UTR-10".to_string(),
                paid_at: Utc.with_ymd_and_hms(2024, 3, 21, 0, 0, 0).unwrap(),
            })
            .unwrap();
        assert_eq!(status, PaymentStatus::Paid);
    }

    #[test]
    fn test_credit_cycle_is_not_invoiced() {
        let mut cycle = closed_cycle(Decimal::ZERO);
        cycle.summary.refunds = dec!(44);
        assert!(cycle.summary.subtotal() < Decimal::ZERO);

        let err = finalizer()
            .finalize(&cycle, Some("KA"), Some("KA"), now())
            .unwrap_err();
        assert!(matches!(err, Error::NegativeSubtotal(_)));
    }
}
