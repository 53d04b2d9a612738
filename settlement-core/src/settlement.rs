//! Settlement facade

use crate::{
    merchant::{MerchantProfile, MerchantRegistry},
    notifier::{Notification, Notifier, TracingNotifier},
    Config, Error, Result,
};
use billing::{
    spawn_periodic, AdjustmentNote, CycleAggregator, Invoice, InvoiceBook, InvoiceFinalizer,
    InvoiceSummary, NoteKind, PaymentInfo, Shipment, SweepGuard,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tariff_engine::{ChargeBreakdown, Dimensions, Direction, TariffBook, Tier, Zone};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracking_sync::{
    CarrierClient, HttpCarrierClient, StatusEvent, StatusEventHandler, SweepReport,
    Synchronizer, TrackingRecord, TrackingStore, ZoneQuery,
};
use uuid::Uuid;
use wallet_ledger::{MerchantId, Transaction, TransactionCategory, WalletLedger};

/// A new order to charge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentOrder {
    /// Caller's shipment id, unique across merchants. Charging the same id
    /// again for the same merchant is a no-op.
    pub shipment_id: String,
    /// Carrier waybill, if already assigned
    pub tracking_id: Option<String>,
    /// Canonical zone
    pub zone: Zone,
    /// Declared dead weight
    pub declared_weight_grams: u32,
    /// Package dimensions
    pub dimensions: Option<Dimensions>,
    /// Amount to collect on delivery; zero for prepaid
    pub cod_amount: Decimal,
    /// Order creation time; picks the billing cycle
    pub created_at: DateTime<Utc>,
}

/// Counts from one billing sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BillingSweepReport {
    /// Cycles closed by this sweep
    pub closed: usize,
    /// Invoices finalized
    pub invoiced: usize,
    /// Closed cycles left uninvoiced (tax configuration, net credit)
    pub blocked: usize,
    /// Invoices whose payment status changed
    pub status_changes: usize,
    /// Another billing sweep was running
    pub skipped: bool,
}

/// Applies carrier transitions to billing
struct BillingStatusHandler {
    aggregator: Arc<CycleAggregator>,
    invoices: Arc<InvoiceBook>,
    notifier: Arc<dyn Notifier>,
}

impl StatusEventHandler for BillingStatusHandler {
    fn on_status(&self, record: &TrackingRecord, event: &StatusEvent) -> tracking_sync::Result<()> {
        let change = self
            .aggregator
            .on_status_change(&record.shipment_id, event.status, event.timestamp)?;

        let Some(change) = change else {
            return Ok(());
        };
        if let Some(transaction) = change.transaction {
            if let Some(invoice_id) = change.credit_against {
                credit_invoiced_refund(
                    &self.invoices,
                    invoice_id,
                    &change.shipment_id,
                    &transaction,
                    event.timestamp,
                );
            }
            self.notifier
                .notify(&Notification::WalletMovement { transaction });
        }
        Ok(())
    }
}

// The wallet was already refunded; the note only records it against the
// invoice, so a failure here is logged rather than undoing the transition
fn credit_invoiced_refund(
    invoices: &InvoiceBook,
    invoice_id: Uuid,
    shipment_id: &str,
    refund: &Transaction,
    at: DateTime<Utc>,
) {
    let reason = format!("Shipment {} cancelled after invoicing", shipment_id);
    if let Err(e) = invoices.issue_note(
        invoice_id,
        NoteKind::Credit,
        refund.amount,
        &reason,
        Some(refund.transaction_id),
        at,
    ) {
        error!(
            invoice_id = %invoice_id,
            shipment_id = %shipment_id,
            error = %e,
            "Failed to record refund credit note"
        );
    }
}

/// Shipping settlement core
///
/// Owns the tariff book, wallet ledger, cycle aggregator, invoice book and
/// tracking store, and exposes the operations the order flow, billing UI and
/// notification dispatcher call.
pub struct ShippingSettlement {
    config: Config,
    tariffs: Arc<TariffBook>,
    ledger: Arc<WalletLedger>,
    aggregator: Arc<CycleAggregator>,
    finalizer: InvoiceFinalizer,
    invoices: Arc<InvoiceBook>,
    merchants: MerchantRegistry,
    carrier: Option<Arc<dyn CarrierClient>>,
    tracking: Arc<TrackingStore>,
    synchronizer: Option<Synchronizer>,
    notifier: Arc<dyn Notifier>,
    billing_guard: SweepGuard,
}

impl std::fmt::Debug for ShippingSettlement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShippingSettlement")
            .field("ledger", &self.ledger)
            .field("tracking_records", &self.tracking.len())
            .field("carrier", &self.carrier.is_some())
            .finish()
    }
}

impl ShippingSettlement {
    /// Build everything from configuration: tariff tables, ledger storage,
    /// and an HTTP carrier when `tracking.carrier_base_url` is set.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let tariffs = Arc::new(config.tariff.load_book()?);
        let ledger = Arc::new(WalletLedger::open(&config.ledger)?);
        let carrier: Option<Arc<dyn CarrierClient>> = match &config.tracking.carrier_base_url {
            Some(url) => {
                let client = HttpCarrierClient::new(url, config.tracking.poll_timeout())?;
                info!(url = %url, "Carrier client configured");
                Some(Arc::new(client))
            }
            None => {
                warn!("No carrier configured; zone lookup and tracking are disabled");
                None
            }
        };

        Self::new(config, tariffs, ledger, carrier, Arc::new(TracingNotifier))
    }

    /// Assemble from parts
    pub fn new(
        config: Config,
        tariffs: Arc<TariffBook>,
        ledger: Arc<WalletLedger>,
        carrier: Option<Arc<dyn CarrierClient>>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        config.validate()?;

        let aggregator = Arc::new(CycleAggregator::new(
            Arc::clone(&ledger),
            Arc::clone(&tariffs),
        ));
        let tracking = Arc::new(TrackingStore::new());
        let invoices = Arc::new(InvoiceBook::new());

        let synchronizer = match &carrier {
            Some(client) => {
                let handler = Arc::new(BillingStatusHandler {
                    aggregator: Arc::clone(&aggregator),
                    invoices: Arc::clone(&invoices),
                    notifier: Arc::clone(&notifier),
                });
                Some(Synchronizer::new(
                    Arc::clone(client),
                    handler,
                    Arc::clone(&tracking),
                    &config.tracking,
                )?)
            }
            None => None,
        };

        Ok(Self {
            finalizer: InvoiceFinalizer::new(&config.billing),
            config,
            tariffs,
            ledger,
            aggregator,
            invoices,
            merchants: MerchantRegistry::new(),
            carrier,
            tracking,
            synchronizer,
            notifier,
            billing_guard: SweepGuard::new(),
        })
    }

    /// Wallet ledger
    pub fn ledger(&self) -> &Arc<WalletLedger> {
        &self.ledger
    }

    /// Cycle aggregator
    pub fn aggregator(&self) -> &Arc<CycleAggregator> {
        &self.aggregator
    }

    /// Tracking records
    pub fn tracking(&self) -> &Arc<TrackingStore> {
        &self.tracking
    }

    // ===== Merchants and pricing =====

    /// Register or update a merchant. The tier must exist.
    pub fn register_merchant(&self, profile: MerchantProfile) -> Result<()> {
        if profile.merchant_id.as_str().trim().is_empty() {
            return Err(Error::InvalidInput("Merchant id must not be empty".to_string()));
        }
        self.tariffs.table(&profile.tier)?;

        info!(
            merchant_id = %profile.merchant_id,
            tier = %profile.tier,
            "Merchant registered"
        );
        self.merchants.upsert(profile);
        Ok(())
    }

    /// Merchant profile
    pub fn merchant(&self, merchant_id: &MerchantId) -> Result<MerchantProfile> {
        self.merchants.get(merchant_id)
    }

    /// Price a shipment without side effects
    pub fn quote(
        &self,
        tier: &Tier,
        direction: Direction,
        zone: Zone,
        weight_grams: u32,
        dimensions: Option<&Dimensions>,
        cod_amount: Decimal,
    ) -> Result<ChargeBreakdown> {
        Ok(self
            .tariffs
            .quote(tier, direction, zone, weight_grams, dimensions, cod_amount)?)
    }

    /// Charge a new order: wallet debit and cycle aggregation as one unit.
    ///
    /// Re-submitting a shipment id returns the original debit.
    pub fn charge_shipment(&self, merchant_id: &MerchantId, order: ShipmentOrder) -> Result<Transaction> {
        let profile = self.merchants.get(merchant_id)?;
        let shipment = Shipment {
            shipment_id: order.shipment_id,
            merchant_id: profile.merchant_id,
            tier: profile.tier,
            tracking_id: order.tracking_id,
            zone: order.zone,
            declared_weight_grams: order.declared_weight_grams,
            dimensions: order.dimensions,
            cod_amount: order.cod_amount,
            created_at: order.created_at,
        };

        let charge = self.aggregator.charge_shipment(&shipment)?;
        if !charge.duplicate {
            self.notifier.notify(&Notification::WalletMovement {
                transaction: charge.transaction.clone(),
            });
        }
        Ok(charge.transaction)
    }

    /// Re-weigh a shipment; returns the surcharge debit, if any
    pub fn record_weight_discrepancy(
        &self,
        shipment_id: &str,
        measured_weight_grams: u32,
        at: DateTime<Utc>,
    ) -> Result<Option<Transaction>> {
        let transaction = self
            .aggregator
            .record_weight_discrepancy(shipment_id, measured_weight_grams, at)?;
        if let Some(tx) = &transaction {
            self.notifier
                .notify(&Notification::WalletMovement { transaction: tx.clone() });
        }
        Ok(transaction)
    }

    /// Current wallet balance
    pub fn get_current_balance(&self, merchant_id: &MerchantId) -> Result<Decimal> {
        Ok(self.ledger.balance(merchant_id)?)
    }

    /// Top up a wallet
    pub fn recharge(&self, merchant_id: &MerchantId, amount: Decimal) -> Result<Transaction> {
        let transaction =
            self.ledger
                .credit(merchant_id, amount, TransactionCategory::Recharge, None)?;
        self.notifier.notify(&Notification::WalletMovement {
            transaction: transaction.clone(),
        });
        Ok(transaction)
    }

    // ===== Carrier =====

    /// Ask the carrier for the zone and collapse it to a canonical letter
    pub async fn resolve_zone(&self, query: &ZoneQuery) -> Result<Zone> {
        let carrier = self.carrier()?;
        let raw = carrier.lookup_zone(query).await?;
        Ok(Zone::normalize(&raw)?)
    }

    /// Start tracking a charged shipment
    pub fn track_shipment(
        &self,
        shipment_id: &str,
        tracking_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TrackingRecord> {
        if tracking_id.trim().is_empty() {
            return Err(Error::InvalidInput("Tracking id must not be empty".to_string()));
        }
        self.aggregator.shipment(shipment_id)?;

        let record = self.tracking.register(tracking_id, shipment_id, now)?;
        self.aggregator.assign_tracking_id(shipment_id, tracking_id)?;
        Ok(record)
    }

    /// Poll one waybill now instead of waiting for the sweep
    pub async fn refresh_tracking(&self, tracking_id: &str, now: DateTime<Utc>) -> Result<TrackingRecord> {
        Ok(self.synchronizer()?.refresh(tracking_id, now).await?)
    }

    fn carrier(&self) -> Result<&Arc<dyn CarrierClient>> {
        self.carrier.as_ref().ok_or_else(no_carrier)
    }

    fn synchronizer(&self) -> Result<&Synchronizer> {
        self.synchronizer.as_ref().ok_or_else(no_carrier)
    }

    // ===== Invoices =====

    /// Invoices whose period starts in `[from, to)`, oldest first
    pub fn list_invoices(
        &self,
        merchant_id: &MerchantId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<InvoiceSummary>> {
        if from >= to {
            return Err(Error::InvalidInput(format!(
                "Empty date range {} .. {}",
                from, to
            )));
        }
        Ok(self.invoices.list(merchant_id, from, to))
    }

    /// Invoice detail
    pub fn get_invoice(&self, invoice_id: Uuid) -> Result<Invoice> {
        Ok(self.invoices.get(invoice_id)?)
    }

    /// Credit and debit notes issued against an invoice, oldest first
    pub fn invoice_notes(&self, invoice_id: Uuid) -> Result<Vec<AdjustmentNote>> {
        self.invoices.get(invoice_id)?;
        Ok(self.invoices.notes(invoice_id))
    }

    /// Record a payment against an invoice
    pub fn mark_invoice_paid(&self, invoice_id: Uuid, payment: PaymentInfo) -> Result<Invoice> {
        Ok(self.invoices.record_payment(invoice_id, payment)?)
    }

    /// Refund part of an invoice to the wallet and issue a credit note
    pub fn issue_credit_note(
        &self,
        invoice_id: Uuid,
        amount: Decimal,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<AdjustmentNote> {
        self.adjust(invoice_id, NoteKind::Credit, amount, reason, now)
    }

    /// Charge an extra amount against an invoice and issue a debit note
    pub fn issue_debit_note(
        &self,
        invoice_id: Uuid,
        amount: Decimal,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<AdjustmentNote> {
        self.adjust(invoice_id, NoteKind::Debit, amount, reason, now)
    }

    fn adjust(
        &self,
        invoice_id: Uuid,
        kind: NoteKind,
        amount: Decimal,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<AdjustmentNote> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidInput(format!(
                "Note amount must be positive, got {}",
                amount
            )));
        }
        let invoice = self.invoices.get(invoice_id)?;
        let merchant = &invoice.merchant_id;

        let transaction = match kind {
            NoteKind::Credit => {
                self.ledger
                    .credit(merchant, amount, TransactionCategory::CreditNote, Some(invoice_id))?
            }
            NoteKind::Debit => {
                self.ledger
                    .debit(merchant, amount, TransactionCategory::DebitNote, None)?
            }
        };

        let note = self.invoices.issue_note(
            invoice_id,
            kind,
            amount,
            reason,
            Some(transaction.transaction_id),
            now,
        )?;
        self.notifier
            .notify(&Notification::WalletMovement { transaction });
        Ok(note)
    }

    // ===== Sweeps =====

    /// Close expired cycles, invoice every closed cycle and refresh overdue
    /// invoices. Safe to repeat; overlapping runs are skipped.
    pub fn run_billing_sweep(&self, now: DateTime<Utc>) -> BillingSweepReport {
        let Some(_permit) = self.billing_guard.try_start() else {
            info!("Billing sweep already running, skipping");
            return BillingSweepReport {
                skipped: true,
                ..BillingSweepReport::default()
            };
        };

        let mut report = BillingSweepReport {
            closed: self.aggregator.close_expired_cycles(now).len(),
            ..BillingSweepReport::default()
        };

        for cycle in self.aggregator.pending_invoicing() {
            let key = cycle.key;
            let profile = self.merchants.get(&key.merchant_id).ok();
            let billing_state = profile.as_ref().and_then(|p| p.billing_state.as_deref());
            let pickup_state = profile.as_ref().and_then(|p| p.pickup_state.as_deref());

            let result = self.aggregator.invoice_cycle(&key, |c| {
                self.finalizer.finalize(c, billing_state, pickup_state, now)
            });

            match result {
                Ok(invoice) => {
                    let notification = Notification::InvoiceIssued {
                        merchant_id: invoice.merchant_id.clone(),
                        invoice_id: invoice.invoice_id,
                        invoice_number: invoice.invoice_number.clone(),
                        amount_due: invoice.amount_due(),
                        due_date: invoice.due_date,
                    };
                    match self.invoices.insert(invoice) {
                        Ok(()) => {
                            report.invoiced += 1;
                            self.notifier.notify(&notification);
                        }
                        Err(e) => error!(cycle = %key, error = %e, "Failed to store invoice"),
                    }
                }
                Err(e @ billing::Error::TaxConfiguration(_)) => {
                    report.blocked += 1;
                    self.notifier.notify(&Notification::InvoiceBlocked {
                        merchant_id: key.merchant_id.clone(),
                        cycle: key.period_label(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    report.blocked += 1;
                    error!(cycle = %key, error = %e, "Failed to invoice cycle");
                }
            }
        }

        report.status_changes = self.invoices.refresh_overdue(now);

        info!(
            closed = report.closed,
            invoiced = report.invoiced,
            blocked = report.blocked,
            "Billing sweep complete"
        );
        report
    }

    /// Poll every active tracking record once
    pub async fn run_tracking_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        Ok(self.synchronizer()?.sweep(now).await)
    }

    /// Run the billing and tracking sweeps on their configured intervals.
    ///
    /// The tracking sweep is only started when a carrier is configured.
    pub fn spawn_background_tasks(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let billing = Arc::clone(self);
        handles.push(spawn_periodic(
            "billing",
            self.config.billing.sweep_interval(),
            move || {
                let billing = Arc::clone(&billing);
                async move {
                    billing.run_billing_sweep(Utc::now());
                }
            },
        ));

        if self.synchronizer.is_some() {
            let tracking = Arc::clone(self);
            handles.push(spawn_periodic(
                "tracking",
                self.config.tracking.poll_interval(),
                move || {
                    let tracking = Arc::clone(&tracking);
                    async move {
                        if let Err(e) = tracking.run_tracking_sweep(Utc::now()).await {
                            error!(error = %e, "Tracking sweep failed");
                        }
                    }
                },
            ));
        }

        handles
    }
}

fn no_carrier() -> Error {
    Error::Tracking(tracking_sync::Error::CarrierUnavailable(
        "No carrier configured".to_string(),
    ))
}
