//! Property-based tests across the facade
//!
//! - Wallet chain holds and never goes negative under any mix of recharges,
//!   charges and cancellations
//! - Concurrent orders for one merchant never overdraw it

use billing::ShipmentStatus;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use settlement_core::{
    Config, ErrorKind, MerchantProfile, ShipmentOrder, ShippingSettlement, TracingNotifier,
};
use std::sync::Arc;
use tariff_engine::{TariffBook, Tier, Zone};
use wallet_ledger::{MerchantId, WalletLedger};

#[derive(Debug, Clone)]
enum Op {
    Recharge(u32),
    Charge { grams: u32, zone: Zone },
    Cancel(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u32..2_000).prop_map(Op::Recharge),
        (
            1u32..12_000,
            prop::sample::select(vec![Zone::A, Zone::B, Zone::C, Zone::D, Zone::E, Zone::F])
        )
            .prop_map(|(grams, zone)| Op::Charge { grams, zone }),
        (0usize..20).prop_map(Op::Cancel),
    ]
}

fn settlement() -> (ShippingSettlement, MerchantId) {
    let settlement = ShippingSettlement::new(
        Config::default(),
        Arc::new(TariffBook::standard()),
        Arc::new(WalletLedger::in_memory().unwrap()),
        None,
        Arc::new(TracingNotifier),
    )
    .unwrap();
    let merchant = MerchantId::new("M-PROP");
    settlement
        .register_merchant(MerchantProfile {
            merchant_id: merchant.clone(),
            tier: Tier::new("basic"),
            billing_state: Some("MH".to_string()),
            pickup_state: Some("MH".to_string()),
        })
        .unwrap();
    (settlement, merchant)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: every operation either applies fully or is refused, and the
    /// balance always equals the sum of signed entries
    #[test]
    fn prop_wallet_consistent_under_mixed_ops(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let (settlement, merchant) = settlement();
        let at = Utc.with_ymd_and_hms(2024, 7, 2, 9, 0, 0).unwrap();
        let mut charged: Vec<String> = Vec::new();

        for (i, op) in ops.iter().enumerate() {
            match op {
                Op::Recharge(amount) => {
                    settlement.recharge(&merchant, Decimal::from(*amount)).unwrap();
                }
                Op::Charge { grams, zone } => {
                    let id = format!("S-{}", i);
                    let result = settlement.charge_shipment(&merchant, ShipmentOrder {
                        shipment_id: id.clone(),
                        tracking_id: None,
                        zone: *zone,
                        declared_weight_grams: *grams,
                        dimensions: None,
                        cod_amount: Decimal::ZERO,
                        created_at: at,
                    });
                    match result {
                        Ok(_) => charged.push(id),
                        Err(e) => prop_assert_eq!(e.kind(), ErrorKind::InsufficientBalance),
                    }
                }
                Op::Cancel(n) => {
                    if let Some(id) = charged.get(n % charged.len().max(1)) {
                        settlement
                            .aggregator()
                            .on_status_change(id, ShipmentStatus::Cancelled, at)
                            .unwrap();
                    }
                }
            }

            let balance = settlement.get_current_balance(&merchant).unwrap();
            prop_assert!(balance >= Decimal::ZERO);
        }

        settlement.ledger().verify_chain(&merchant).unwrap();
        let history = settlement.ledger().history(&merchant).unwrap();
        let sum: Decimal = history.iter().map(|t| t.signed_amount()).sum();
        prop_assert_eq!(sum, settlement.get_current_balance(&merchant).unwrap());

        let cycle = settlement
            .aggregator()
            .get_or_create_current_cycle(&merchant, at)
            .unwrap();
        prop_assert_eq!(cycle.summary.total_shipments, charged.len() as u64);
    }
}

#[test]
fn test_concurrent_orders_never_overdraw() {
    let (settlement, merchant) = settlement();
    let settlement = Arc::new(settlement);
    // 25 orders of 44 fit in 1100
    settlement.recharge(&merchant, Decimal::from(1100)).unwrap();
    let at = Utc.with_ymd_and_hms(2024, 7, 2, 9, 0, 0).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let settlement = Arc::clone(&settlement);
            let merchant = merchant.clone();
            std::thread::spawn(move || {
                (0..10)
                    .filter(|i| {
                        settlement
                            .charge_shipment(
                                &merchant,
                                ShipmentOrder {
                                    shipment_id: format!("T{}-{}", t, i),
                                    tracking_id: None,
                                    zone: Zone::C,
                                    declared_weight_grams: 500,
                                    dimensions: None,
                                    cod_amount: Decimal::ZERO,
                                    created_at: at,
                                },
                            )
                            .is_ok()
                    })
                    .count()
            })
        })
        .collect();

    let succeeded: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(succeeded, 25);
    assert_eq!(settlement.get_current_balance(&merchant).unwrap(), Decimal::ZERO);

    let cycle = settlement
        .aggregator()
        .get_or_create_current_cycle(&merchant, at)
        .unwrap();
    assert_eq!(cycle.summary.total_shipments, 25);
    settlement.ledger().verify_chain(&merchant).unwrap();
}
