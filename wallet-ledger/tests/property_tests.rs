//! Property-based tests for ledger invariants
//!
//! - Balance chain: every entry balances and links to its predecessor
//! - Non-negativity: no sequence of postings drives a wallet below zero
//! - Concurrency: parallel debits never overdraw a fixed balance

use proptest::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::thread;
use wallet_ledger::{EntrySide, MerchantId, Posting, TransactionCategory, WalletLedger};

/// Strategy for generating valid amounts (positive, two decimal places)
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..500_00i64).prop_map(|paise| Decimal::new(paise, 2))
}

/// Strategy for generating postings, debits weighted toward shipment charges
fn posting_strategy() -> impl Strategy<Value = Posting> {
    (any::<bool>(), amount_strategy()).prop_map(|(is_credit, amount)| {
        if is_credit {
            Posting::credit(amount, TransactionCategory::Recharge)
        } else {
            Posting::debit(amount, TransactionCategory::ShipmentCharge)
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: accepted postings form an unbroken chain and the balance is
    /// the running sum of accepted signed amounts
    #[test]
    fn prop_balance_chain_holds(postings in prop::collection::vec(posting_strategy(), 1..60)) {
        let ledger = WalletLedger::in_memory().unwrap();
        let merchant = MerchantId::new("M-PROP");

        let mut expected = Decimal::ZERO;
        let mut accepted = 0usize;
        for posting in postings {
            let side = posting.side;
            let amount = posting.amount;
            match ledger.post(&merchant, posting) {
                Ok(tx) => {
                    prop_assert!(tx.is_balanced());
                    prop_assert_eq!(tx.opening_balance, expected);
                    expected = tx.closing_balance;
                    accepted += 1;
                }
                Err(e) => {
                    // Only debits larger than the balance may be refused
                    prop_assert!(e.is_insufficient_balance());
                    prop_assert_eq!(side, EntrySide::Debit);
                    prop_assert!(amount > expected);
                }
            }
            prop_assert!(expected >= Decimal::ZERO);
        }

        prop_assert_eq!(ledger.balance(&merchant).unwrap(), expected);
        prop_assert_eq!(ledger.history(&merchant).unwrap().len(), accepted);
        prop_assert!(ledger.verify_chain(&merchant).is_ok());
    }

    /// Property: reversing every debit restores the sum of recharges
    #[test]
    fn prop_reversals_restore_recharges(
        recharge in amount_strategy(),
        charges in prop::collection::vec(amount_strategy(), 1..10),
    ) {
        let ledger = WalletLedger::in_memory().unwrap();
        let merchant = MerchantId::new("M-REV");
        let topup = recharge * Decimal::from(20);
        ledger.credit(&merchant, topup, TransactionCategory::Recharge, None).unwrap();

        let mut debits = Vec::new();
        for amount in charges {
            if let Ok(tx) = ledger.debit(&merchant, amount, TransactionCategory::ShipmentCharge, None) {
                debits.push(tx.transaction_id);
            }
        }

        for id in debits {
            ledger.reverse(id, "cancelled").unwrap();
        }

        prop_assert_eq!(ledger.balance(&merchant).unwrap(), topup);
        prop_assert!(ledger.verify_chain(&merchant).is_ok());
    }
}

#[test]
fn test_concurrent_debits_never_overdraw() {
    let ledger = Arc::new(WalletLedger::in_memory().unwrap());
    let merchant = MerchantId::new("M-CONCURRENT");

    // Room for exactly 25 debits of 40
    ledger
        .credit(&merchant, Decimal::from(1_000), TransactionCategory::Recharge, None)
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            let merchant = merchant.clone();
            thread::spawn(move || {
                let mut ok = 0usize;
                for _ in 0..10 {
                    match ledger.debit(
                        &merchant,
                        Decimal::from(40),
                        TransactionCategory::ShipmentCharge,
                        None,
                    ) {
                        Ok(_) => ok += 1,
                        Err(e) => assert!(e.is_insufficient_balance()),
                    }
                }
                ok
            })
        })
        .collect();

    let succeeded: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(succeeded, 25);
    assert_eq!(ledger.balance(&merchant).unwrap(), Decimal::ZERO);
    assert_eq!(ledger.metrics().refused_debits_total.get(), 80 - 25);
    ledger.verify_chain(&merchant).unwrap();
}

#[test]
fn test_concurrent_merchants_are_isolated() {
    let ledger = Arc::new(WalletLedger::in_memory().unwrap());

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                let merchant = MerchantId::new(format!("M-{}", i));
                ledger
                    .credit(&merchant, Decimal::from(100), TransactionCategory::Recharge, None)
                    .unwrap();
                for _ in 0..10 {
                    ledger
                        .debit(&merchant, Decimal::from(10), TransactionCategory::ShipmentCharge, None)
                        .unwrap();
                }
                merchant
            })
        })
        .collect();

    for handle in handles {
        let merchant = handle.join().unwrap();
        assert_eq!(ledger.balance(&merchant).unwrap(), Decimal::ZERO);
        assert_eq!(ledger.history(&merchant).unwrap().len(), 11);
    }
}
