//! Billing cycle aggregation
//!
//! Every cycle sits behind its own mutex. Writers that also move money take
//! the cycle lock first and the wallet's merchant lock second, so a charge
//! and its cycle update apply together or not at all. When two cycles are
//! involved the older one is always locked first.

use crate::{
    cycle::{BillingCycle, ChargeLine, CycleKey, CycleStatus, LineKind, ShipmentEntry},
    invoice::Invoice,
    types::{Outcome, PaymentMode, Shipment, ShipmentStatus},
    Error, Result,
};
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use tariff_engine::{ChargeBreakdown, Direction, TariffBook};
use tracing::{debug, info, warn};
use wallet_ledger::{MerchantId, ShipmentRef, Transaction, TransactionCategory, WalletLedger};

/// Result of charging a shipment
#[derive(Debug, Clone)]
pub struct ShipmentCharge {
    /// Forward debit
    pub transaction: Transaction,
    /// Pricing
    pub breakdown: ChargeBreakdown,
    /// Cycle that admitted the shipment
    pub cycle: CycleKey,
    /// The shipment had already been charged; nothing new happened
    pub duplicate: bool,
}

/// An applied status transition
#[derive(Debug, Clone)]
pub struct StatusChange {
    /// Shipment
    pub shipment_id: String,
    /// Previous status
    pub from: ShipmentStatus,
    /// New status
    pub to: ShipmentStatus,
    /// Cycle that admitted the shipment
    pub cycle: CycleKey,
    /// Cycle that received any money movement
    pub billed_to: CycleKey,
    /// RTO debit or cancellation refund, if one was posted
    pub transaction: Option<Transaction>,
    /// Invoice the refund corrects, when the shipment's cycle was already
    /// invoiced. The refund is not carried as a line anywhere in that case.
    pub credit_against: Option<uuid::Uuid>,
}

impl StatusChange {
    /// The money movement landed in a later cycle
    pub fn is_late(&self) -> bool {
        self.cycle != self.billed_to
    }
}

enum Movement {
    None,
    RtoCharge,
    Refund,
}

type CycleHandle = Arc<Mutex<BillingCycle>>;

/// Billing cycle aggregator
pub struct CycleAggregator {
    ledger: Arc<WalletLedger>,
    tariffs: Arc<TariffBook>,
    cycles: DashMap<CycleKey, CycleHandle>,
    /// shipment id → cycle that admitted it
    index: DashMap<String, CycleKey>,
}

impl std::fmt::Debug for CycleAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleAggregator")
            .field("cycles", &self.cycles.len())
            .field("shipments", &self.index.len())
            .finish()
    }
}

impl CycleAggregator {
    /// Create aggregator
    pub fn new(ledger: Arc<WalletLedger>, tariffs: Arc<TariffBook>) -> Self {
        Self {
            ledger,
            tariffs,
            cycles: DashMap::new(),
            index: DashMap::new(),
        }
    }

    /// Wallet ledger
    pub fn ledger(&self) -> &Arc<WalletLedger> {
        &self.ledger
    }

    /// Tariff book
    pub fn tariffs(&self) -> &Arc<TariffBook> {
        &self.tariffs
    }

    fn cycle_handle(&self, key: &CycleKey) -> Result<CycleHandle> {
        match self.cycles.entry(key.clone()) {
            Entry::Occupied(e) => Ok(Arc::clone(e.get())),
            Entry::Vacant(e) => {
                let cycle = BillingCycle::open(key.clone())?;
                info!(
                    cycle = %key,
                    period_start = %cycle.period_start,
                    period_end = %cycle.period_end,
                    "Opened billing cycle"
                );
                Ok(Arc::clone(e.insert(Arc::new(Mutex::new(cycle))).value()))
            }
        }
    }

    fn existing_handle(&self, key: &CycleKey) -> Result<CycleHandle> {
        self.cycles
            .get(key)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| Error::CycleNotFound(key.to_string()))
    }

    fn home_of(&self, shipment_id: &str) -> Result<CycleKey> {
        self.index
            .get(shipment_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::ShipmentNotFound(shipment_id.to_string()))
    }

    /// Find or lazily create the cycle covering `now`
    pub fn get_or_create_current_cycle(
        &self,
        merchant: &MerchantId,
        now: DateTime<Utc>,
    ) -> Result<BillingCycle> {
        let handle = self.cycle_handle(&CycleKey::for_date(merchant, now))?;
        let cycle = handle.lock().clone();
        Ok(cycle)
    }

    /// Snapshot of one cycle
    pub fn cycle(&self, key: &CycleKey) -> Result<BillingCycle> {
        let handle = self.existing_handle(key)?;
        let cycle = handle.lock().clone();
        Ok(cycle)
    }

    /// All cycles of a merchant, oldest first
    pub fn cycles_for(&self, merchant: &MerchantId) -> Vec<BillingCycle> {
        self.snapshot(|key, _| &key.merchant_id == merchant)
    }

    /// Closed cycles still waiting for an invoice, oldest first
    pub fn pending_invoicing(&self) -> Vec<BillingCycle> {
        self.snapshot(|_, cycle| cycle.status == CycleStatus::Closed)
    }

    fn snapshot(&self, keep: impl Fn(&CycleKey, &BillingCycle) -> bool) -> Vec<BillingCycle> {
        let handles: Vec<(CycleKey, CycleHandle)> = self
            .cycles
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        let mut cycles: Vec<BillingCycle> = handles
            .into_iter()
            .filter_map(|(key, handle)| {
                let cycle = handle.lock();
                keep(&key, &cycle).then(|| cycle.clone())
            })
            .collect();
        cycles.sort_by(|a, b| a.key.cmp(&b.key));
        cycles
    }

    /// Per-shipment state
    pub fn shipment(&self, shipment_id: &str) -> Result<ShipmentEntry> {
        let handle = self.existing_handle(&self.home_of(shipment_id)?)?;
        let cycle = handle.lock();
        cycle
            .shipments
            .get(shipment_id)
            .cloned()
            .ok_or_else(|| Error::ShipmentNotFound(shipment_id.to_string()))
    }

    /// Record the carrier waybill assigned after booking
    pub fn assign_tracking_id(&self, shipment_id: &str, tracking_id: &str) -> Result<()> {
        let handle = self.existing_handle(&self.home_of(shipment_id)?)?;
        let mut cycle = handle.lock();
        let entry = cycle
            .shipments
            .get_mut(shipment_id)
            .ok_or_else(|| Error::ShipmentNotFound(shipment_id.to_string()))?;
        entry.shipment.tracking_id = Some(tracking_id.to_string());
        Ok(())
    }

    /// Price a shipment, debit the wallet and admit it to its cycle.
    ///
    /// A shipment id that was already charged returns the original debit
    /// with `duplicate` set and changes nothing.
    pub fn charge_shipment(&self, shipment: &Shipment) -> Result<ShipmentCharge> {
        if shipment.shipment_id.trim().is_empty() {
            return Err(Error::InvalidInput("Shipment id must not be empty".to_string()));
        }

        let breakdown = self.tariffs.quote(
            &shipment.tier,
            Direction::Forward,
            shipment.zone,
            shipment.declared_weight_grams,
            shipment.dimensions.as_ref(),
            shipment.cod_amount,
        )?;

        let key = CycleKey::for_date(&shipment.merchant_id, shipment.created_at);
        let handle = self.cycle_handle(&key)?;
        let mut cycle = handle.lock();

        if let Some(home) = self.reserve(&shipment.shipment_id, &key) {
            drop(cycle);
            Self::check_owner(&home, shipment)?;
            debug!(shipment_id = %shipment.shipment_id, "Duplicate shipment charge ignored");
            return self.existing_charge(&home, &shipment.shipment_id);
        }

        if !cycle.is_open() {
            self.index.remove(&shipment.shipment_id);
            return Err(Error::CycleNotOpen(key.to_string()));
        }

        let shipment_ref = ShipmentRef {
            shipment_id: shipment.shipment_id.clone(),
            tracking_id: shipment.tracking_id.clone(),
            weight_grams: breakdown.chargeable_weight_grams,
            zone: shipment.zone,
        };

        let transaction = match self.ledger.debit(
            &shipment.merchant_id,
            breakdown.total,
            TransactionCategory::ShipmentCharge,
            Some(shipment_ref),
        ) {
            Ok(tx) => tx,
            Err(e) => {
                self.index.remove(&shipment.shipment_id);
                return Err(e.into());
            }
        };

        cycle.admit(shipment, &breakdown, transaction.transaction_id, shipment.created_at);

        info!(
            shipment_id = %shipment.shipment_id,
            merchant_id = %shipment.merchant_id,
            cycle = %key,
            amount = %breakdown.total,
            "Shipment charged"
        );

        Ok(ShipmentCharge {
            transaction,
            breakdown,
            cycle: key,
            duplicate: false,
        })
    }

    /// Admit a shipment whose debit was posted elsewhere.
    ///
    /// Returns false when the shipment id was already admitted.
    pub fn add_shipment(
        &self,
        shipment: &Shipment,
        charge: &ChargeBreakdown,
        transaction_id: uuid::Uuid,
    ) -> Result<bool> {
        let key = CycleKey::for_date(&shipment.merchant_id, shipment.created_at);
        let handle = self.cycle_handle(&key)?;
        let mut cycle = handle.lock();

        if let Some(home) = self.reserve(&shipment.shipment_id, &key) {
            Self::check_owner(&home, shipment)?;
            return Ok(false);
        }
        if !cycle.is_open() {
            self.index.remove(&shipment.shipment_id);
            return Err(Error::CycleNotOpen(key.to_string()));
        }

        Ok(cycle.admit(shipment, charge, transaction_id, shipment.created_at))
    }

    // Claims the shipment id for `key`; returns the existing owner if taken
    fn reserve(&self, shipment_id: &str, key: &CycleKey) -> Option<CycleKey> {
        match self.index.entry(shipment_id.to_string()) {
            Entry::Occupied(e) => Some(e.get().clone()),
            Entry::Vacant(e) => {
                e.insert(key.clone());
                None
            }
        }
    }

    // Shipment ids are unique across merchants; a repeat from another
    // merchant is a conflict, not a duplicate
    fn check_owner(home: &CycleKey, shipment: &Shipment) -> Result<()> {
        if home.merchant_id != shipment.merchant_id {
            warn!(
                shipment_id = %shipment.shipment_id,
                merchant_id = %shipment.merchant_id,
                "Shipment id already belongs to another merchant"
            );
            return Err(Error::InvalidInput(format!(
                "Shipment id {} is already in use",
                shipment.shipment_id
            )));
        }
        Ok(())
    }

    fn existing_charge(&self, home: &CycleKey, shipment_id: &str) -> Result<ShipmentCharge> {
        let handle = self.existing_handle(home)?;
        let cycle = handle.lock();
        let entry = cycle
            .shipments
            .get(shipment_id)
            .ok_or_else(|| Error::ShipmentNotFound(shipment_id.to_string()))?;

        Ok(ShipmentCharge {
            transaction: self.ledger.transaction(entry.charge_transaction_id)?,
            breakdown: entry.charge.clone(),
            cycle: home.clone(),
            duplicate: true,
        })
    }

    // First open cycle strictly after `home` that covers `at` or later
    fn late_target(&self, home: &CycleKey, at: DateTime<Utc>) -> Result<CycleHandle> {
        let from_date = CycleKey::for_date(&home.merchant_id, at);
        let mut key = std::cmp::max(from_date, home.next());
        loop {
            let handle = self.cycle_handle(&key)?;
            if handle.lock().is_open() {
                return Ok(handle);
            }
            key = key.next();
        }
    }

    /// Apply a status transition.
    ///
    /// Moves the shipment between outcome buckets. The first move into RTO
    /// debits the RTO tariff; a cancellation refunds the forward charge. If
    /// the ledger refuses, nothing changes. RTO charges and COD collected
    /// for a shipment whose cycle is already closed go to the merchant's
    /// next open cycle as late lines. A refund stays with the shipment's own
    /// cycle until it is invoiced; after that it is reported through
    /// `credit_against` instead of becoming a line. Returns `None` when
    /// nothing changed.
    pub fn on_status_change(
        &self,
        shipment_id: &str,
        to: ShipmentStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<StatusChange>> {
        let home = self.home_of(shipment_id)?;
        let home_handle = self.existing_handle(&home)?;
        let mut cycle = home_handle.lock();

        let entry = cycle
            .shipments
            .get(shipment_id)
            .cloned()
            .ok_or_else(|| Error::ShipmentNotFound(shipment_id.to_string()))?;
        let from = entry.status;

        if from == to {
            return Ok(None);
        }
        if from.is_terminal() {
            warn!(
                shipment_id = %shipment_id,
                from = %from,
                to = %to,
                "Ignoring transition out of a terminal status"
            );
            return Ok(None);
        }

        let movement = if to.outcome() == Outcome::Rto && entry.rto_transaction_id.is_none() {
            Movement::RtoCharge
        } else if to == ShipmentStatus::Cancelled && entry.refund_transaction_id.is_none() {
            Movement::Refund
        } else {
            Movement::None
        };
        let collects_cod =
            to == ShipmentStatus::Delivered && entry.shipment.payment_mode() == PaymentMode::Cod;

        let needs_late_cycle =
            !cycle.is_open() && (matches!(movement, Movement::RtoCharge) || collects_cod);
        let target_handle = if needs_late_cycle {
            Some(self.late_target(&home, at)?)
        } else {
            None
        };
        let mut target = target_handle.as_ref().map(|h| h.lock());
        if let Some(t) = target.as_ref() {
            if !t.is_open() {
                return Err(Error::CycleNotOpen(t.key.to_string()));
            }
        }

        // Money first; any refusal leaves both cycles untouched
        let transaction = match movement {
            Movement::None => None,
            Movement::RtoCharge => Some(self.charge_rto(&entry)?),
            Movement::Refund => Some(
                self.ledger
                    .reverse(entry.charge_transaction_id, "Shipment cancelled")?,
            ),
        };

        if cycle.is_open() {
            cycle.move_bucket(from, to);
        }
        if let Some(e) = cycle.shipments.get_mut(shipment_id) {
            e.status = to;
            match (&movement, &transaction) {
                (Movement::RtoCharge, Some(tx)) => e.rto_transaction_id = Some(tx.transaction_id),
                (Movement::Refund, Some(tx)) => e.refund_transaction_id = Some(tx.transaction_id),
                _ => {}
            }
        }

        let billed: &mut BillingCycle = match target.as_mut() {
            Some(t) => &mut **t,
            None => &mut *cycle,
        };
        let late = billed.key != home;
        let credit_against = match movement {
            Movement::Refund if billed.status == CycleStatus::Invoiced => billed.invoice_id,
            _ => None,
        };

        if let (Some(tx), None) = (&transaction, credit_against) {
            let (kind, freight, cod, amount) = match movement {
                Movement::Refund => (
                    LineKind::Refund,
                    -entry.charge.freight_charge,
                    -entry.charge.cod_charge,
                    -tx.amount,
                ),
                _ => (LineKind::Rto, tx.amount, Decimal::ZERO, tx.amount),
            };
            billed.push_line(ChargeLine {
                shipment_id: shipment_id.to_string(),
                tracking_id: entry.shipment.tracking_id.clone(),
                transaction_id: tx.transaction_id,
                kind,
                zone: entry.shipment.zone,
                chargeable_weight_grams: entry.billed_weight_grams,
                freight_charge: freight,
                cod_charge: cod,
                amount,
                late,
                recorded_at: at,
            });
        }
        if collects_cod {
            billed.summary.cod_amount_collected += entry.shipment.cod_amount;
        }
        let billed_to = billed.key.clone();

        info!(
            shipment_id = %shipment_id,
            from = %from,
            to = %to,
            cycle = %home,
            billed_to = %billed_to,
            "Shipment status changed"
        );

        Ok(Some(StatusChange {
            shipment_id: shipment_id.to_string(),
            from,
            to,
            cycle: home,
            billed_to,
            transaction,
            credit_against,
        }))
    }

    fn charge_rto(&self, entry: &ShipmentEntry) -> Result<Transaction> {
        let shipment = &entry.shipment;
        let rto = self.tariffs.price(
            &shipment.tier,
            Direction::Rto,
            shipment.zone,
            entry.billed_weight_grams,
            0,
            Decimal::ZERO,
        )?;

        let shipment_ref = ShipmentRef {
            shipment_id: shipment.shipment_id.clone(),
            tracking_id: shipment.tracking_id.clone(),
            weight_grams: rto.chargeable_weight_grams,
            zone: shipment.zone,
        };

        Ok(self.ledger.debit(
            &shipment.merchant_id,
            rto.total,
            TransactionCategory::RtoCharge,
            Some(shipment_ref),
        )?)
    }

    /// Re-price a shipment the carrier re-weighed and debit the difference.
    ///
    /// Only a heavier chargeable weight that prices higher produces a debit;
    /// anything else returns `None` and changes nothing.
    pub fn record_weight_discrepancy(
        &self,
        shipment_id: &str,
        chargeable_weight_grams: u32,
        at: DateTime<Utc>,
    ) -> Result<Option<Transaction>> {
        let home = self.home_of(shipment_id)?;
        let home_handle = self.existing_handle(&home)?;
        let mut cycle = home_handle.lock();

        let entry = cycle
            .shipments
            .get(shipment_id)
            .cloned()
            .ok_or_else(|| Error::ShipmentNotFound(shipment_id.to_string()))?;

        if chargeable_weight_grams <= entry.billed_weight_grams {
            return Ok(None);
        }

        let shipment = &entry.shipment;
        let repriced = self.tariffs.price(
            &shipment.tier,
            Direction::Forward,
            shipment.zone,
            chargeable_weight_grams,
            0,
            Decimal::ZERO,
        )?;
        let difference = repriced.freight_charge - entry.billed_freight;
        if difference <= Decimal::ZERO {
            debug!(
                shipment_id = %shipment_id,
                weight_grams = chargeable_weight_grams,
                "Re-weigh stays within the billed slab"
            );
            return Ok(None);
        }

        let target_handle = if cycle.is_open() {
            None
        } else {
            Some(self.late_target(&home, at)?)
        };
        let mut target = target_handle.as_ref().map(|h| h.lock());
        if let Some(t) = target.as_ref() {
            if !t.is_open() {
                return Err(Error::CycleNotOpen(t.key.to_string()));
            }
        }

        let transaction = self.ledger.debit(
            &shipment.merchant_id,
            difference,
            TransactionCategory::WeightDiscrepancy,
            Some(ShipmentRef {
                shipment_id: shipment.shipment_id.clone(),
                tracking_id: shipment.tracking_id.clone(),
                weight_grams: chargeable_weight_grams,
                zone: shipment.zone,
            }),
        )?;

        if cycle.is_open() {
            cycle.summary.chargeable_weight_grams +=
                u64::from(chargeable_weight_grams - entry.billed_weight_grams);
        }
        if let Some(e) = cycle.shipments.get_mut(shipment_id) {
            e.billed_weight_grams = chargeable_weight_grams;
            e.billed_freight = repriced.freight_charge;
        }

        let billed: &mut BillingCycle = match target.as_mut() {
            Some(t) => &mut **t,
            None => &mut *cycle,
        };
        let late = billed.key != home;
        billed.push_line(ChargeLine {
            shipment_id: shipment_id.to_string(),
            tracking_id: shipment.tracking_id.clone(),
            transaction_id: transaction.transaction_id,
            kind: LineKind::WeightDiscrepancy,
            zone: shipment.zone,
            chargeable_weight_grams,
            freight_charge: difference,
            cod_charge: Decimal::ZERO,
            amount: difference,
            late,
            recorded_at: at,
        });

        info!(
            shipment_id = %shipment_id,
            previous_grams = entry.billed_weight_grams,
            new_grams = chargeable_weight_grams,
            amount = %difference,
            "Weight discrepancy charged"
        );

        Ok(Some(transaction))
    }

    /// Close every open cycle whose period ended at or before `now`.
    ///
    /// Returns the cycles closed by this call; repeating it is a no-op.
    pub fn close_expired_cycles(&self, now: DateTime<Utc>) -> Vec<BillingCycle> {
        let handles: Vec<CycleHandle> = self.cycles.iter().map(|e| Arc::clone(e.value())).collect();

        let mut closed = Vec::new();
        for handle in handles {
            let mut cycle = handle.lock();
            if cycle.is_open() && cycle.has_expired(now) {
                cycle.status = CycleStatus::Closed;
                cycle.closed_at = Some(now);
                info!(
                    cycle = %cycle.key,
                    shipments = cycle.summary.total_shipments,
                    subtotal = %cycle.summary.subtotal(),
                    "Closed billing cycle"
                );
                closed.push(cycle.clone());
            }
        }

        closed.sort_by(|a, b| a.key.cmp(&b.key));
        closed
    }

    /// Turn a closed cycle into an invoice as one serialized transition.
    ///
    /// `finalize` runs under the cycle lock; if it fails the cycle stays
    /// closed and uninvoiced.
    pub fn invoice_cycle(
        &self,
        key: &CycleKey,
        finalize: impl FnOnce(&BillingCycle) -> Result<Invoice>,
    ) -> Result<Invoice> {
        let handle = self.existing_handle(key)?;
        let mut cycle = handle.lock();

        if cycle.status != CycleStatus::Closed {
            return Err(Error::CycleNotClosed(key.to_string()));
        }

        let invoice = finalize(&cycle)?;
        cycle.status = CycleStatus::Invoiced;
        cycle.invoice_id = Some(invoice.invoice_id);

        info!(
            cycle = %key,
            invoice_number = %invoice.invoice_number,
            "Billing cycle invoiced"
        );

        Ok(invoice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use tariff_engine::{Tier, Zone};

    fn merchant() -> MerchantId {
        MerchantId::new("M-1")
    }

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, h, 0, 0).unwrap()
    }

    fn aggregator(balance: Decimal) -> CycleAggregator {
        let ledger = Arc::new(WalletLedger::in_memory().unwrap());
        ledger
            .credit(&merchant(), balance, TransactionCategory::Recharge, None)
            .unwrap();
        CycleAggregator::new(ledger, Arc::new(TariffBook::standard()))
    }

    fn shipment(id: &str, grams: u32, cod: Decimal, day: u32) -> Shipment {
        Shipment {
            shipment_id: id.to_string(),
            merchant_id: merchant(),
            tier: Tier::new("basic"),
            tracking_id: Some(format!("AWB-{}", id)),
            zone: Zone::C,
            declared_weight_grams: grams,
            dimensions: None,
            cod_amount: cod,
            created_at: at(day, 10),
        }
    }

    #[test]
    fn test_charge_debits_and_admits() {
        let agg = aggregator(dec!(1000));
        let charge = agg
            .charge_shipment(&shipment("S-1", 5000, Decimal::ZERO, 3))
            .unwrap();

        assert!(!charge.duplicate);
        assert_eq!(charge.transaction.amount, dec!(370));
        assert_eq!(agg.ledger().balance(&merchant()).unwrap(), dec!(630));

        let cycle = agg.cycle(&charge.cycle).unwrap();
        assert_eq!(cycle.summary.total_shipments, 1);
        assert_eq!(cycle.summary.forward_charges, dec!(370));
        assert_eq!(cycle.summary.prepaid_count, 1);
    }

    #[test]
    fn test_duplicate_charge_is_noop() {
        let agg = aggregator(dec!(1000));
        let s = shipment("S-1", 400, Decimal::ZERO, 3);

        let first = agg.charge_shipment(&s).unwrap();
        let second = agg.charge_shipment(&s).unwrap();

        assert!(second.duplicate);
        assert_eq!(second.transaction.transaction_id, first.transaction.transaction_id);
        assert_eq!(agg.ledger().history(&merchant()).unwrap().len(), 2);
        assert_eq!(agg.cycle(&first.cycle).unwrap().summary.total_shipments, 1);
    }

    #[test]
    fn test_shipment_id_owned_by_other_merchant_rejected() {
        let agg = aggregator(dec!(1000));
        let other = MerchantId::new("M-2");
        agg.ledger()
            .credit(&other, dec!(1000), TransactionCategory::Recharge, None)
            .unwrap();
        agg.charge_shipment(&shipment("S-1", 400, Decimal::ZERO, 3))
            .unwrap();
        let before = agg.ledger().balance(&merchant()).unwrap();

        let mut theirs = shipment("S-1", 400, Decimal::ZERO, 3);
        theirs.merchant_id = other.clone();
        let err = agg.charge_shipment(&theirs).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let breakdown = agg
            .tariffs()
            .quote(&theirs.tier, Direction::Forward, theirs.zone, 400, None, Decimal::ZERO)
            .unwrap();
        let err = agg
            .add_shipment(&theirs, &breakdown, uuid::Uuid::now_v7())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(agg.ledger().balance(&other).unwrap(), dec!(1000));
        assert_eq!(agg.ledger().balance(&merchant()).unwrap(), before);
        assert_eq!(agg.shipment("S-1").unwrap().shipment.merchant_id, merchant());
    }

    #[test]
    fn test_add_shipment_twice_counts_once() {
        let agg = aggregator(dec!(1000));
        let s = shipment("S-9", 400, Decimal::ZERO, 3);
        let breakdown = agg
            .tariffs()
            .quote(&s.tier, Direction::Forward, s.zone, 400, None, Decimal::ZERO)
            .unwrap();

        assert!(agg.add_shipment(&s, &breakdown, uuid::Uuid::now_v7()).unwrap());
        assert!(!agg.add_shipment(&s, &breakdown, uuid::Uuid::now_v7()).unwrap());

        let cycle = agg.get_or_create_current_cycle(&merchant(), at(3, 0)).unwrap();
        assert_eq!(cycle.summary.total_shipments, 1);
        assert_eq!(cycle.summary.forward_charges, breakdown.freight_charge);
    }

    #[test]
    fn test_refused_debit_leaves_cycle_untouched() {
        let agg = aggregator(dec!(10));
        let s = shipment("S-1", 5000, Decimal::ZERO, 3);

        let err = agg.charge_shipment(&s).unwrap_err();
        assert!(err.is_insufficient_balance());

        let cycle = agg.get_or_create_current_cycle(&merchant(), at(3, 0)).unwrap();
        assert_eq!(cycle.summary.total_shipments, 0);
        assert!(matches!(agg.shipment("S-1"), Err(Error::ShipmentNotFound(_))));

        // The id is free again once the wallet is topped up
        agg.ledger()
            .credit(&merchant(), dec!(500), TransactionCategory::Recharge, None)
            .unwrap();
        assert!(!agg.charge_shipment(&s).unwrap().duplicate);
    }

    #[test]
    fn test_status_moves_buckets_and_collects_cod() {
        let agg = aggregator(dec!(1000));
        let charge = agg
            .charge_shipment(&shipment("S-1", 400, dec!(750), 3))
            .unwrap();

        agg.on_status_change("S-1", ShipmentStatus::InTransit, at(4, 0))
            .unwrap()
            .unwrap();
        let change = agg
            .on_status_change("S-1", ShipmentStatus::Delivered, at(5, 0))
            .unwrap()
            .unwrap();
        assert!(change.transaction.is_none());

        let cycle = agg.cycle(&charge.cycle).unwrap();
        assert_eq!(cycle.summary.pending, 0);
        assert_eq!(cycle.summary.in_transit, 0);
        assert_eq!(cycle.summary.delivered, 1);
        assert_eq!(cycle.summary.cod_amount_collected, dec!(750));

        // Terminal latch
        assert!(agg
            .on_status_change("S-1", ShipmentStatus::RtoInitiated, at(6, 0))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_rto_charged_once() {
        let agg = aggregator(dec!(1000));
        let charge = agg
            .charge_shipment(&shipment("S-1", 5000, Decimal::ZERO, 3))
            .unwrap();

        let change = agg
            .on_status_change("S-1", ShipmentStatus::RtoInitiated, at(4, 0))
            .unwrap()
            .unwrap();
        let rto = change.transaction.unwrap();
        assert_eq!(rto.category, TransactionCategory::RtoCharge);

        let again = agg
            .on_status_change("S-1", ShipmentStatus::RtoInTransit, at(5, 0))
            .unwrap()
            .unwrap();
        assert!(again.transaction.is_none());

        let cycle = agg.cycle(&charge.cycle).unwrap();
        assert_eq!(cycle.summary.rto, 1);
        assert_eq!(cycle.summary.rto_charges, rto.amount);
        assert_eq!(
            agg.ledger().balance(&merchant()).unwrap(),
            dec!(1000) - dec!(370) - rto.amount
        );
    }

    #[test]
    fn test_rto_refused_when_wallet_empty() {
        let agg = aggregator(dec!(370));
        agg.charge_shipment(&shipment("S-1", 5000, Decimal::ZERO, 3))
            .unwrap();

        let err = agg
            .on_status_change("S-1", ShipmentStatus::RtoInitiated, at(4, 0))
            .unwrap_err();
        assert!(err.is_insufficient_balance());
        assert_eq!(agg.shipment("S-1").unwrap().status, ShipmentStatus::Booked);
    }

    #[test]
    fn test_cancellation_refunds() {
        let agg = aggregator(dec!(1000));
        let charge = agg
            .charge_shipment(&shipment("S-1", 400, Decimal::ZERO, 3))
            .unwrap();

        let change = agg
            .on_status_change("S-1", ShipmentStatus::Cancelled, at(3, 12))
            .unwrap()
            .unwrap();
        let refund = change.transaction.unwrap();
        assert_eq!(refund.category, TransactionCategory::Refund);
        assert_eq!(agg.ledger().balance(&merchant()).unwrap(), dec!(1000));

        let cycle = agg.cycle(&charge.cycle).unwrap();
        assert_eq!(cycle.summary.cancelled, 1);
        assert_eq!(cycle.summary.subtotal(), Decimal::ZERO);
        assert_eq!(cycle.lines_total(), Decimal::ZERO);
    }

    #[test]
    fn test_close_expired_is_idempotent() {
        let agg = aggregator(dec!(1000));
        let charge = agg
            .charge_shipment(&shipment("S-1", 400, Decimal::ZERO, 3))
            .unwrap();

        assert!(agg.close_expired_cycles(at(15, 23)).is_empty());

        let closed = agg.close_expired_cycles(at(16, 0));
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].status, CycleStatus::Closed);
        assert!(agg.close_expired_cycles(at(20, 0)).is_empty());

        // Closed cycle admits nothing new
        let err = agg
            .charge_shipment(&shipment("S-2", 400, Decimal::ZERO, 4))
            .unwrap_err();
        assert!(matches!(err, Error::CycleNotOpen(_)));
        assert_eq!(agg.pending_invoicing().len(), 1);
        assert_eq!(agg.pending_invoicing()[0].key, charge.cycle);
    }

    #[test]
    fn test_late_rto_billed_to_next_cycle() {
        let agg = aggregator(dec!(1000));
        let charge = agg
            .charge_shipment(&shipment("S-1", 400, Decimal::ZERO, 14))
            .unwrap();
        let frozen = agg.close_expired_cycles(at(16, 1)).remove(0);

        let change = agg
            .on_status_change("S-1", ShipmentStatus::RtoInitiated, at(18, 0))
            .unwrap()
            .unwrap();

        assert!(change.is_late());
        assert_eq!(change.billed_to, charge.cycle.next());
        assert_eq!(agg.cycle(&charge.cycle).unwrap().summary, frozen.summary);

        let next = agg.cycle(&charge.cycle.next()).unwrap();
        assert_eq!(next.lines.len(), 1);
        assert!(next.lines[0].late);
        assert_eq!(next.summary.rto_charges, change.transaction.unwrap().amount);
        assert_eq!(next.summary.total_shipments, 0);
    }

    #[test]
    fn test_refund_before_invoicing_stays_home() {
        let agg = aggregator(dec!(1000));
        let charge = agg
            .charge_shipment(&shipment("S-1", 400, Decimal::ZERO, 14))
            .unwrap();
        agg.close_expired_cycles(at(16, 1));

        let change = agg
            .on_status_change("S-1", ShipmentStatus::Cancelled, at(17, 0))
            .unwrap()
            .unwrap();
        assert!(!change.is_late());
        assert!(change.credit_against.is_none());

        let home = agg.cycle(&charge.cycle).unwrap();
        assert_eq!(home.summary.subtotal(), Decimal::ZERO);
        assert!(agg.cycle(&charge.cycle.next()).is_err());
    }

    #[test]
    fn test_refund_after_invoicing_is_a_credit() {
        let agg = aggregator(dec!(1000));
        let charge = agg
            .charge_shipment(&shipment("S-1", 400, Decimal::ZERO, 14))
            .unwrap();
        agg.close_expired_cycles(at(16, 1));
        let invoice = agg
            .invoice_cycle(&charge.cycle, |c| {
                crate::InvoiceFinalizer::new(&crate::Config::default())
                    .finalize(c, Some("KA"), Some("KA"), at(16, 1))
            })
            .unwrap();

        let change = agg
            .on_status_change("S-1", ShipmentStatus::Cancelled, at(17, 0))
            .unwrap()
            .unwrap();
        assert_eq!(change.credit_against, Some(invoice.invoice_id));
        assert_eq!(change.transaction.unwrap().amount, dec!(44));
        assert_eq!(agg.ledger().balance(&merchant()).unwrap(), dec!(1000));

        // Nothing lands in the next cycle, so it cannot net negative
        agg.get_or_create_current_cycle(&merchant(), at(17, 0)).unwrap();
        let next = agg.cycle(&charge.cycle.next()).unwrap();
        assert!(next.lines.is_empty());
        assert_eq!(next.summary.subtotal(), Decimal::ZERO);
        assert_eq!(agg.cycle(&charge.cycle).unwrap().summary, invoice.summary);
    }

    #[test]
    fn test_weight_discrepancy_charges_difference() {
        let agg = aggregator(dec!(1000));
        let charge = agg
            .charge_shipment(&shipment("S-1", 400, Decimal::ZERO, 3))
            .unwrap();

        // Lighter or same-slab re-weigh changes nothing
        assert!(agg
            .record_weight_discrepancy("S-1", 300, at(4, 0))
            .unwrap()
            .is_none());

        let tx = agg
            .record_weight_discrepancy("S-1", 1000, at(4, 0))
            .unwrap()
            .unwrap();
        assert_eq!(tx.category, TransactionCategory::WeightDiscrepancy);

        let cycle = agg.cycle(&charge.cycle).unwrap();
        assert_eq!(cycle.summary.adjustment_charges, tx.amount);
        assert_eq!(
            cycle.summary.forward_charges + cycle.summary.adjustment_charges,
            agg.tariffs()
                .price(&Tier::new("basic"), Direction::Forward, Zone::C, 1000, 0, Decimal::ZERO)
                .unwrap()
                .freight_charge
        );
        assert_eq!(agg.shipment("S-1").unwrap().billed_weight_grams, 1000);
    }

    #[test]
    fn test_invoice_cycle_requires_closed() {
        let agg = aggregator(dec!(1000));
        let charge = agg
            .charge_shipment(&shipment("S-1", 400, Decimal::ZERO, 3))
            .unwrap();

        let err = agg
            .invoice_cycle(&charge.cycle, |_| unreachable!())
            .unwrap_err();
        assert!(matches!(err, Error::CycleNotClosed(_)));
    }

    #[test]
    fn test_failed_finalize_keeps_cycle_closed() {
        let agg = aggregator(dec!(1000));
        let charge = agg
            .charge_shipment(&shipment("S-1", 400, Decimal::ZERO, 3))
            .unwrap();
        agg.close_expired_cycles(at(16, 0));

        let err = agg
            .invoice_cycle(&charge.cycle, |_| {
                Err(Error::TaxConfiguration("missing state".to_string()))
            })
            .unwrap_err();
        assert!(matches!(err, Error::TaxConfiguration(_)));
        assert_eq!(agg.cycle(&charge.cycle).unwrap().status, CycleStatus::Closed);
    }
}
