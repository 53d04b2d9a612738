//! Invoice store

use crate::{
    cycle::CycleKey,
    invoice::{AdjustmentNote, Invoice, InvoiceSummary, NoteKind, PaymentInfo, PaymentStatus},
    Error, Result,
};
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use rust_decimal::Decimal;
use uuid::Uuid;
use wallet_ledger::MerchantId;

/// Finalized invoices and their adjustment notes
#[derive(Debug, Default)]
pub struct InvoiceBook {
    invoices: DashMap<Uuid, Invoice>,
    by_cycle: DashMap<CycleKey, Uuid>,
    notes: DashMap<Uuid, Vec<AdjustmentNote>>,
}

impl InvoiceBook {
    /// Create empty book
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a finalized invoice. One invoice per cycle.
    pub fn insert(&self, invoice: Invoice) -> Result<()> {
        match self.by_cycle.entry(invoice.cycle.clone()) {
            Entry::Occupied(e) => Err(Error::InvalidInput(format!(
                "Cycle {} already invoiced as {}",
                invoice.cycle,
                e.get()
            ))),
            Entry::Vacant(e) => {
                e.insert(invoice.invoice_id);
                self.invoices.insert(invoice.invoice_id, invoice);
                Ok(())
            }
        }
    }

    /// Invoice by ID
    pub fn get(&self, invoice_id: Uuid) -> Result<Invoice> {
        self.invoices
            .get(&invoice_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::InvoiceNotFound(invoice_id.to_string()))
    }

    /// Invoice for a cycle
    pub fn for_cycle(&self, key: &CycleKey) -> Option<Invoice> {
        let id = *self.by_cycle.get(key)?.value();
        self.invoices.get(&id).map(|e| e.value().clone())
    }

    /// Invoices of a merchant whose period starts in `[from, to)`, oldest first
    pub fn list(
        &self,
        merchant: &MerchantId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<InvoiceSummary> {
        let mut found: Vec<InvoiceSummary> = self
            .invoices
            .iter()
            .filter(|e| {
                let inv = e.value();
                &inv.merchant_id == merchant && inv.period_start >= from && inv.period_start < to
            })
            .map(|e| e.value().summary_view())
            .collect();
        found.sort_by_key(|s| s.period_start);
        found
    }

    /// Record a payment
    pub fn record_payment(&self, invoice_id: Uuid, payment: PaymentInfo) -> Result<Invoice> {
        let mut entry = self
            .invoices
            .get_mut(&invoice_id)
            .ok_or_else(|| Error::InvoiceNotFound(invoice_id.to_string()))?;

        let status = entry.apply_payment(payment)?;
        tracing::info!(
            invoice_number = %entry.invoice_number,
            amount_paid = %entry.amount_paid,
            status = ?status,
            "Payment recorded"
        );

        Ok(entry.clone())
    }

    /// Mark unpaid invoices past their due date. Returns how many changed.
    pub fn refresh_overdue(&self, now: DateTime<Utc>) -> usize {
        let mut changed = 0;
        for mut entry in self.invoices.iter_mut() {
            let before = entry.payment_status;
            if entry.refresh_status(now) != before {
                changed += 1;
                if entry.payment_status == PaymentStatus::Overdue {
                    tracing::warn!(invoice_number = %entry.invoice_number, "Invoice overdue");
                }
            }
        }
        changed
    }

    /// Issue a credit or debit note against an invoice
    pub fn issue_note(
        &self,
        invoice_id: Uuid,
        kind: NoteKind,
        amount: Decimal,
        reason: &str,
        transaction_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<AdjustmentNote> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidInput(format!(
                "Note amount must be positive, got {}",
                amount
            )));
        }
        let invoice = self.get(invoice_id)?;

        let mut notes = self.notes.entry(invoice_id).or_default();
        let prefix = match kind {
            NoteKind::Credit => "CN",
            NoteKind::Debit => "DN",
        };
        // CN and DN are numbered as separate series
        let sequence = notes.iter().filter(|n| n.kind == kind).count() + 1;
        let note = AdjustmentNote {
            note_id: Uuid::now_v7(),
            note_number: format!("{}-{}-{}", prefix, invoice.invoice_number, sequence),
            invoice_id,
            kind,
            amount,
            reason: reason.to_string(),
            transaction_id,
            issued_at: now,
        };
        notes.push(note.clone());

        tracing::info!(
            note_number = %note.note_number,
            amount = %amount,
            "Adjustment note issued"
        );

        Ok(note)
    }

    /// Notes issued against an invoice, oldest first
    pub fn notes(&self, invoice_id: Uuid) -> Vec<AdjustmentNote> {
        self.notes
            .get(&invoice_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cycle::{BillingCycle, CycleStatus},
        invoice::InvoiceFinalizer,
        Config,
    };
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn invoice_for(day: u32, month: u32) -> Invoice {
        let at = Utc.with_ymd_and_hms(2024, month, day, 0, 0, 0).unwrap();
        let mut cycle = BillingCycle::open(CycleKey::for_date(&MerchantId::new("M-1"), at)).unwrap();
        cycle.summary.forward_charges = dec!(200);
        cycle.status = CycleStatus::Closed;
        InvoiceFinalizer::new(&Config::default())
            .finalize(&cycle, Some("DL"), Some("DL"), cycle.period_end)
            .unwrap()
    }

    #[test]
    fn test_one_invoice_per_cycle() {
        let book = InvoiceBook::new();
        let invoice = invoice_for(3, 4);
        book.insert(invoice.clone()).unwrap();

        let mut again = invoice_for(3, 4);
        again.invoice_id = Uuid::now_v7();
        assert!(book.insert(again).is_err());
        assert_eq!(book.for_cycle(&invoice.cycle).unwrap(), invoice);
    }

    #[test]
    fn test_list_by_range() {
        let book = InvoiceBook::new();
        book.insert(invoice_for(3, 4)).unwrap();
        book.insert(invoice_for(20, 4)).unwrap();
        book.insert(invoice_for(3, 5)).unwrap();

        let from = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let listed = book.list(&MerchantId::new("M-1"), from, to);

        assert_eq!(listed.len(), 2);
        assert!(listed[0].period_start < listed[1].period_start);
        assert_eq!(listed[0].grand_total, dec!(236.00));
        assert!(book.list(&MerchantId::new("M-2"), from, to).is_empty());
    }

    #[test]
    fn test_payment_and_notes() {
        let book = InvoiceBook::new();
        let invoice = invoice_for(3, 4);
        let id = invoice.invoice_id;
        book.insert(invoice).unwrap();

        let paid = book
            .record_payment(
                id,
                PaymentInfo {
                    amount: dec!(236),
                    reference: "UTR-9".to_string(),
                    paid_at: Utc.with_ymd_and_hms(2024, 4, 17, 0, 0, 0).unwrap(),
                },
            )
            .unwrap();
        assert_eq!(paid.payment_status, PaymentStatus::Paid);

        let note = book
            .issue_note(id, NoteKind::Credit, dec!(20), "Goodwill", None, Utc::now())
            .unwrap();
        assert_eq!(note.note_number, "CN-INV-M-1-202404-C1-1");
        assert_eq!(book.notes(id), vec![note]);

        // The invoice itself is untouched by notes
        assert_eq!(book.get(id).unwrap().grand_total, paid.grand_total);
        assert!(matches!(
            book.get(Uuid::now_v7()),
            Err(Error::InvoiceNotFound(_))
        ));
    }

    #[test]
    fn test_note_series_numbered_separately() {
        let book = InvoiceBook::new();
        let invoice = invoice_for(3, 4);
        let id = invoice.invoice_id;
        book.insert(invoice).unwrap();

        let numbers: Vec<String> = [NoteKind::Credit, NoteKind::Debit, NoteKind::Credit, NoteKind::Debit]
            .into_iter()
            .map(|kind| {
                book.issue_note(id, kind, dec!(5), "Correction", None, Utc::now())
                    .unwrap()
                    .note_number
            })
            .collect();

        assert_eq!(
            numbers,
            vec![
                "CN-INV-M-1-202404-C1-1",
                "DN-INV-M-1-202404-C1-1",
                "CN-INV-M-1-202404-C1-2",
                "DN-INV-M-1-202404-C1-2",
            ]
        );
    }

    #[test]
    fn test_refresh_overdue() {
        let book = InvoiceBook::new();
        book.insert(invoice_for(3, 4)).unwrap();

        let before_due = Utc.with_ymd_and_hms(2024, 4, 20, 0, 0, 0).unwrap();
        assert_eq!(book.refresh_overdue(before_due), 0);

        let after_due = Utc.with_ymd_and_hms(2024, 4, 24, 0, 0, 0).unwrap();
        assert_eq!(book.refresh_overdue(after_due), 1);
        assert_eq!(book.refresh_overdue(after_due), 0);
    }
}
