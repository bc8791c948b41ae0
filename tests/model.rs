use std::time::Duration;

use account_ledger::{
    Ledger, LedgerConfig, LedgerError, account::verify_chain, storage::in_memory::InMemoryStorage,
};
use proptest::prelude::*;
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy)]
enum Op {
    Deposit(Decimal),
    Withdraw(Decimal),
}

fn amount() -> impl Strategy<Value = Decimal> {
    // cents up to one million
    (1i64..=100_000_000).prop_map(|cents| Decimal::new(cents, 2))
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![amount().prop_map(Op::Deposit), amount().prop_map(Op::Withdraw)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn balance_follows_a_simple_model(ops in prop::collection::vec(op(), 0..40)) {
        let ledger = Ledger::new(
            InMemoryStorage::new(),
            LedgerConfig { retry_delay: Duration::ZERO, ..LedgerConfig::default() },
        );
        let number = ledger
            .open_account("Jane Doe", "+628123456789", "3204081901970001")
            .unwrap();

        let mut expected = Decimal::ZERO;
        let mut applied = 0;
        for op in ops {
            match op {
                Op::Deposit(amount) => {
                    ledger.deposit(&number, amount).unwrap();
                    expected += amount;
                    applied += 1;
                }
                Op::Withdraw(amount) => match ledger.withdraw(&number, amount) {
                    Ok(_) => {
                        prop_assert!(amount <= expected);
                        expected -= amount;
                        applied += 1;
                    }
                    Err(LedgerError::InsufficientBalance { balance, requested }) => {
                        prop_assert!(amount > expected);
                        prop_assert_eq!(balance, expected);
                        prop_assert_eq!(requested, amount);
                    }
                    Err(err) => prop_assert!(false, "unexpected error: {}", err),
                },
            }
        }

        let history = ledger.history(&number).unwrap();
        prop_assert_eq!(history.len(), applied);
        prop_assert_eq!(ledger.get_balance(&number).unwrap(), expected);
        prop_assert_eq!(verify_chain(Decimal::ZERO, &history), Ok(expected));
    }
}
