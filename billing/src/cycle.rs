//! Billing cycles
//!
//! A month is split into two fixed periods per merchant: days 1-15 are
//! cycle 1 and day 16 to month end is cycle 2. Boundaries are computed in
//! UTC and the end of a period is exclusive, so 15th 23:59:59 belongs to
//! cycle 1 and 16th 00:00:00 to cycle 2.

use crate::{
    types::{Outcome, PaymentMode, Shipment, ShipmentStatus},
    Error, Result,
};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tariff_engine::{ChargeBreakdown, Zone};
use uuid::Uuid;
use wallet_ledger::MerchantId;

/// Unique identity of a cycle: (merchant, year, month, cycle number)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CycleKey {
    /// Merchant
    pub merchant_id: MerchantId,
    /// Calendar year
    pub year: i32,
    /// Calendar month, 1-12
    pub month: u32,
    /// 1 for days 1-15, 2 for the rest of the month
    pub cycle_number: u8,
}

impl CycleKey {
    /// Cycle containing `at`
    pub fn for_date(merchant_id: &MerchantId, at: DateTime<Utc>) -> Self {
        Self {
            merchant_id: merchant_id.clone(),
            year: at.year(),
            month: at.month(),
            cycle_number: if at.day() <= 15 { 1 } else { 2 },
        }
    }

    /// The cycle that follows this one
    pub fn next(&self) -> Self {
        let (year, month, cycle_number) = match (self.cycle_number, self.month) {
            (1, month) => (self.year, month, 2),
            (_, 12) => (self.year + 1, 1, 1),
            (_, month) => (self.year, month + 1, 1),
        };
        Self {
            merchant_id: self.merchant_id.clone(),
            year,
            month,
            cycle_number,
        }
    }

    /// `[start, end)` of the period
    pub fn bounds(&self) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let start_day = if self.cycle_number == 1 { 1 } else { 16 };
        let start = midnight(self.year, self.month, start_day)?;
        let end = if self.cycle_number == 1 {
            midnight(self.year, self.month, 16)?
        } else if self.month == 12 {
            midnight(self.year + 1, 1, 1)?
        } else {
            midnight(self.year, self.month + 1, 1)?
        };
        Ok((start, end))
    }

    /// `YYYYMM-C<n>`
    pub fn period_label(&self) -> String {
        format!("{}{:02}-C{}", self.year, self.month, self.cycle_number)
    }
}

impl fmt::Display for CycleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.merchant_id, self.period_label())
    }
}

fn midnight(year: i32, month: u32, day: u32) -> Result<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| Error::InvalidInput(format!("Invalid date {}-{}-{}", year, month, day)))
}

/// Cycle lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    /// Accepting shipments
    Open,
    /// Period ended, summary frozen
    Closed,
    /// Invoice generated and linked
    Invoiced,
}

/// What a charge line represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    /// Forward freight plus COD fee
    Shipment,
    /// Return-to-origin tariff
    Rto,
    /// Re-weigh surcharge
    WeightDiscrepancy,
    /// Reversal of a shipment charge
    Refund,
}

/// One contributing ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeLine {
    /// Shipment
    pub shipment_id: String,
    /// Carrier waybill
    pub tracking_id: Option<String>,
    /// Ledger entry that moved the money
    pub transaction_id: Uuid,
    /// Kind
    pub kind: LineKind,
    /// Zone
    pub zone: Zone,
    /// Chargeable weight the amount was computed on
    pub chargeable_weight_grams: u32,
    /// Freight part
    pub freight_charge: Decimal,
    /// COD fee part
    pub cod_charge: Decimal,
    /// Signed amount billed; refunds are negative
    pub amount: Decimal,
    /// Belongs to a shipment from an earlier, already closed cycle
    pub late: bool,
    /// When the line was recorded
    pub recorded_at: DateTime<Utc>,
}

/// Running totals of a cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleSummary {
    /// Shipments admitted
    pub total_shipments: u64,
    /// Booked, not picked up
    pub pending: u64,
    /// Forward leg in progress
    pub in_transit: u64,
    /// Returning or returned
    pub rto: u64,
    /// Delivered
    pub delivered: u64,
    /// Cancelled
    pub cancelled: u64,
    /// Lost
    pub lost: u64,
    /// Prepaid shipments
    pub prepaid_count: u64,
    /// COD shipments
    pub cod_count: u64,
    /// Sum of declared weights
    pub declared_weight_grams: u64,
    /// Sum of chargeable weights
    pub chargeable_weight_grams: u64,
    /// Forward freight
    pub forward_charges: Decimal,
    /// COD fees
    pub cod_charges: Decimal,
    /// RTO tariffs
    pub rto_charges: Decimal,
    /// Weight discrepancy surcharges
    pub adjustment_charges: Decimal,
    /// Refunds (positive)
    pub refunds: Decimal,
    /// COD collected on delivered shipments
    pub cod_amount_collected: Decimal,
}

impl CycleSummary {
    /// Counter for an outcome bucket
    pub fn bucket(&self, outcome: Outcome) -> u64 {
        match outcome {
            Outcome::Pending => self.pending,
            Outcome::InTransit => self.in_transit,
            Outcome::Rto => self.rto,
            Outcome::Delivered => self.delivered,
            Outcome::Cancelled => self.cancelled,
            Outcome::Lost => self.lost,
        }
    }

    fn bucket_mut(&mut self, outcome: Outcome) -> &mut u64 {
        match outcome {
            Outcome::Pending => &mut self.pending,
            Outcome::InTransit => &mut self.in_transit,
            Outcome::Rto => &mut self.rto,
            Outcome::Delivered => &mut self.delivered,
            Outcome::Cancelled => &mut self.cancelled,
            Outcome::Lost => &mut self.lost,
        }
    }

    /// Net amount billable: all charges minus refunds, full precision
    pub fn subtotal(&self) -> Decimal {
        self.forward_charges + self.cod_charges + self.rto_charges + self.adjustment_charges
            - self.refunds
    }

    fn apply_line(&mut self, line: &ChargeLine) {
        match line.kind {
            LineKind::Shipment => {
                self.forward_charges += line.freight_charge;
                self.cod_charges += line.cod_charge;
            }
            LineKind::Rto => self.rto_charges += line.amount,
            LineKind::WeightDiscrepancy => self.adjustment_charges += line.amount,
            LineKind::Refund => self.refunds -= line.amount,
        }
    }
}

/// Per-shipment state kept by the cycle that admitted it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentEntry {
    /// Shipment as admitted
    pub shipment: Shipment,
    /// Latest internal status
    pub status: ShipmentStatus,
    /// Forward pricing at admission
    pub charge: ChargeBreakdown,
    /// Chargeable weight after any re-weigh
    pub billed_weight_grams: u32,
    /// Freight billed so far, including re-weigh surcharges
    pub billed_freight: Decimal,
    /// Forward debit
    pub charge_transaction_id: Uuid,
    /// RTO debit, once charged
    pub rto_transaction_id: Option<Uuid>,
    /// Refund credit, once reversed
    pub refund_transaction_id: Option<Uuid>,
}

/// One merchant's billing period
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingCycle {
    /// Cycle ID
    pub cycle_id: Uuid,
    /// Identity
    pub key: CycleKey,
    /// Inclusive start
    pub period_start: DateTime<Utc>,
    /// Exclusive end
    pub period_end: DateTime<Utc>,
    /// Lifecycle status
    pub status: CycleStatus,
    /// Running totals
    pub summary: CycleSummary,
    /// Shipments per zone
    pub zone_distribution: BTreeMap<Zone, u64>,
    /// Shipments admitted by this cycle
    pub shipments: BTreeMap<String, ShipmentEntry>,
    /// Contributing ledger entries, in recording order
    pub lines: Vec<ChargeLine>,
    /// When the cycle closed
    pub closed_at: Option<DateTime<Utc>>,
    /// Linked invoice
    pub invoice_id: Option<Uuid>,
}

impl BillingCycle {
    /// Empty open cycle
    pub fn open(key: CycleKey) -> Result<Self> {
        let (period_start, period_end) = key.bounds()?;
        Ok(Self {
            cycle_id: Uuid::now_v7(),
            key,
            period_start,
            period_end,
            status: CycleStatus::Open,
            summary: CycleSummary::default(),
            zone_distribution: BTreeMap::new(),
            shipments: BTreeMap::new(),
            lines: Vec::new(),
            closed_at: None,
            invoice_id: None,
        })
    }

    /// Whether new shipments and charges are admitted
    pub fn is_open(&self) -> bool {
        self.status == CycleStatus::Open
    }

    /// Whether the period is over at `now`
    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.period_end
    }

    /// Admit a shipment. Returns false if it was already admitted.
    pub(crate) fn admit(
        &mut self,
        shipment: &Shipment,
        charge: &ChargeBreakdown,
        transaction_id: Uuid,
        at: DateTime<Utc>,
    ) -> bool {
        if self.shipments.contains_key(&shipment.shipment_id) {
            return false;
        }

        let summary = &mut self.summary;
        summary.total_shipments += 1;
        summary.pending += 1;
        match shipment.payment_mode() {
            PaymentMode::Prepaid => summary.prepaid_count += 1,
            PaymentMode::Cod => summary.cod_count += 1,
        }
        summary.declared_weight_grams += u64::from(shipment.declared_weight_grams);
        summary.chargeable_weight_grams += u64::from(charge.chargeable_weight_grams);
        *self.zone_distribution.entry(shipment.zone).or_insert(0) += 1;

        self.push_line(ChargeLine {
            shipment_id: shipment.shipment_id.clone(),
            tracking_id: shipment.tracking_id.clone(),
            transaction_id,
            kind: LineKind::Shipment,
            zone: shipment.zone,
            chargeable_weight_grams: charge.chargeable_weight_grams,
            freight_charge: charge.freight_charge,
            cod_charge: charge.cod_charge,
            amount: charge.total,
            late: false,
            recorded_at: at,
        });

        self.shipments.insert(
            shipment.shipment_id.clone(),
            ShipmentEntry {
                shipment: shipment.clone(),
                status: ShipmentStatus::Booked,
                charge: charge.clone(),
                billed_weight_grams: charge.chargeable_weight_grams,
                billed_freight: charge.freight_charge,
                charge_transaction_id: transaction_id,
                rto_transaction_id: None,
                refund_transaction_id: None,
            },
        );

        true
    }

    /// Move one shipment between outcome buckets
    pub(crate) fn move_bucket(&mut self, from: ShipmentStatus, to: ShipmentStatus) {
        let (from, to) = (from.outcome(), to.outcome());
        if from == to {
            return;
        }
        let source = self.summary.bucket_mut(from);
        *source = source.saturating_sub(1);
        *self.summary.bucket_mut(to) += 1;
    }

    pub(crate) fn push_line(&mut self, line: ChargeLine) {
        self.summary.apply_line(&line);
        self.lines.push(line);
    }

    /// Sum of signed line amounts; equals `summary.subtotal()`
    pub fn lines_total(&self) -> Decimal {
        self.lines.iter().map(|l| l.amount).sum()
    }
}
