use std::time::Instant;

use rust_decimal::Decimal;
use tracing::info_span;

use crate::{
    account::{Account, AccountError, AccountType, NewTransaction, Transaction},
    command::Amount,
    number::NumberGenerator,
    storage::{AccountStore, Storage, TransactionStore},
};

use super::{Ledger, LedgerError, log_outcome};

/// Only saving accounts are opened today.
const ACCOUNT_TYPE: AccountType = AccountType::Saving;

impl<S: Storage, G: NumberGenerator> Ledger<S, G> {
    /// Credits `amount` to the account and appends the matching entry.
    pub fn deposit(&self, account_number: &str, amount: Decimal) -> Result<Transaction, LedgerError> {
        self.traced(|| {
            let _span = info_span!("deposit", account_number, %amount).entered();
            let started = Instant::now();
            let result = Amount::deposit(amount)
                .map_err(LedgerError::from)
                .and_then(|amount| {
                    self.mutate(account_number, |account| account.handle_deposit(amount.value()))
                });
            log_outcome("deposit", started, result)
        })
    }

    /// Debits `amount` from the account and appends the matching entry.
    /// Fails without writing anything when the balance does not cover it.
    pub fn withdraw(&self, account_number: &str, amount: Decimal) -> Result<Transaction, LedgerError> {
        self.traced(|| {
            let _span = info_span!("withdraw", account_number, %amount).entered();
            let started = Instant::now();
            let result = Amount::withdrawal(amount)
                .map_err(LedgerError::from)
                .and_then(|amount| {
                    self.mutate(account_number, |account| {
                        account.handle_withdrawal(amount.value())
                    })
                });
            log_outcome("withdraw", started, result)
        })
    }

    /// Point-in-time balance. Does not wait for in-flight mutations.
    pub fn get_balance(&self, account_number: &str) -> Result<Decimal, LedgerError> {
        self.traced(|| {
            let _span = info_span!("get_balance", account_number).entered();
            let started = Instant::now();
            let result = self
                .storage
                .read_only(|unit| -> Result<Account, LedgerError> {
                    find_active(unit.read_account(ACCOUNT_TYPE, account_number)?)
                })
                .map(|account| account.balance());
            log_outcome("get_balance", started, result)
        })
    }

    /// Every entry of the account, oldest first.
    pub fn history(&self, account_number: &str) -> Result<Vec<Transaction>, LedgerError> {
        self.traced(|| {
            let _span = info_span!("history", account_number).entered();
            let started = Instant::now();
            let result: Result<_, LedgerError> = self.storage.read_only(|unit| {
                let account = find_active(unit.read_account(ACCOUNT_TYPE, account_number)?)?;
                Ok(unit.transactions_for_account(account.id)?)
            });
            log_outcome("history", started, result)
        })
    }

    /// Locked read-modify-write of one account. The balance update and the
    /// entry append land in the same unit or not at all.
    fn mutate<F>(&self, account_number: &str, handle: F) -> Result<Transaction, LedgerError>
    where
        F: FnOnce(&Account) -> Result<NewTransaction, AccountError>,
    {
        self.storage.run_atomic(|unit| {
            let mut account =
                find_active(unit.read_account_for_update(ACCOUNT_TYPE, account_number)?)?;
            let entry = handle(&account)?;
            account.apply(&entry);
            unit.update_account(&account)?;
            Ok(unit.insert_transaction(entry)?)
        })
    }
}

fn find_active(account: Option<Account>) -> Result<Account, LedgerError> {
    account
        .filter(Account::is_active)
        .ok_or(LedgerError::AccountNotFound)
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use crate::{
        account::{AccountStatus, TransactionKind, verify_chain},
        command::CommandError,
        ledger::LedgerConfig,
        storage::in_memory::{Fault, InMemoryStorage},
    };

    use super::*;

    fn ledger_with_account() -> (Ledger<InMemoryStorage>, String) {
        let ledger = Ledger::new(InMemoryStorage::new(), LedgerConfig::default());
        let number = ledger
            .open_account("Jane Doe", "+628123456789", "3204081901970001")
            .unwrap();
        (ledger, number)
    }

    #[test]
    fn deposit_then_withdraw_chains_entries() {
        let (ledger, number) = ledger_with_account();

        let credit = ledger.deposit(&number, dec!(50000)).unwrap();
        assert_eq!(credit.kind, TransactionKind::Credit);
        assert_eq!(credit.amount, dec!(50000));
        assert_eq!(
            (credit.initial_balance, credit.final_balance),
            (dec!(0), dec!(50000))
        );

        let debit = ledger.withdraw(&number, dec!(20000)).unwrap();
        assert_eq!(debit.kind, TransactionKind::Debit);
        assert_eq!(
            (debit.initial_balance, debit.final_balance),
            (dec!(50000), dec!(30000))
        );

        assert_eq!(ledger.get_balance(&number).unwrap(), dec!(30000));
        let history = ledger.history(&number).unwrap();
        assert_eq!(history, vec![credit, debit]);
        assert_eq!(verify_chain(Decimal::ZERO, &history), Ok(dec!(30000)));
    }

    #[test]
    fn insufficient_balance_writes_nothing() {
        let (ledger, number) = ledger_with_account();
        ledger.deposit(&number, dec!(100000)).unwrap();

        let err = ledger.withdraw(&number, dec!(150000)).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                balance,
                requested
            } if balance == dec!(100000) && requested == dec!(150000)
        ));
        assert_eq!(ledger.get_balance(&number).unwrap(), dec!(100000));
        assert_eq!(ledger.history(&number).unwrap().len(), 1);

        // draining to exactly zero is fine
        ledger.withdraw(&number, dec!(100000)).unwrap();
        assert_eq!(ledger.get_balance(&number).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn unknown_account() {
        let (ledger, _) = ledger_with_account();
        for result in [
            ledger.deposit("0000000000", dec!(1)).map(|_| ()),
            ledger.withdraw("0000000000", dec!(1)).map(|_| ()),
            ledger.get_balance("0000000000").map(|_| ()),
            ledger.history("0000000000").map(|_| ()),
        ] {
            assert!(matches!(result, Err(LedgerError::AccountNotFound)));
        }
    }

    #[test]
    fn inactive_account_is_not_found() {
        let (ledger, number) = ledger_with_account();
        ledger
            .storage()
            .run_atomic(|unit| {
                let mut account = unit
                    .read_account_for_update(ACCOUNT_TYPE, &number)?
                    .unwrap();
                account.status = AccountStatus::Unspecified;
                unit.update_account(&account)
            })
            .unwrap();
        assert!(matches!(
            ledger.deposit(&number, dec!(10)),
            Err(LedgerError::AccountNotFound)
        ));
    }

    #[test]
    fn invalid_amounts_are_rejected_up_front() {
        let (ledger, number) = ledger_with_account();
        assert!(matches!(
            ledger.deposit(&number, Decimal::ZERO),
            Err(LedgerError::Command(_))
        ));
        assert!(matches!(
            ledger.withdraw(&number, dec!(-5)),
            Err(LedgerError::Command(_))
        ));
        assert!(matches!(
            ledger.deposit(&number, dec!(1000000000)),
            Err(LedgerError::Command(_))
        ));
        assert!(ledger.history(&number).unwrap().is_empty());
    }

    #[test]
    fn amounts_finer_than_a_cent_never_reach_the_balance() {
        let (ledger, number) = ledger_with_account();
        ledger.deposit(&number, dec!(999999999)).unwrap();

        let err = ledger.deposit(&number, Decimal::new(1, 22)).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Command(CommandError::TooManyDecimals { .. })
        ));
        assert!(matches!(
            ledger.withdraw(&number, dec!(0.001)),
            Err(LedgerError::Command(CommandError::TooManyDecimals { .. }))
        ));

        let credit = ledger.deposit(&number, dec!(0.01)).unwrap();
        assert_eq!(credit.final_balance - credit.initial_balance, credit.amount);
        assert_eq!(ledger.get_balance(&number).unwrap(), dec!(999999999.01));
        assert_eq!(ledger.history(&number).unwrap().len(), 2);
    }

    #[test]
    fn failed_append_rolls_back_the_balance() {
        let (ledger, number) = ledger_with_account();
        ledger.deposit(&number, dec!(500)).unwrap();

        for fault in [Fault::InsertTransaction, Fault::UpdateAccount, Fault::Commit] {
            ledger.storage().inject_fault(fault);
            assert!(matches!(
                ledger.withdraw(&number, dec!(200)),
                Err(LedgerError::Storage(_))
            ));
            assert_eq!(ledger.get_balance(&number).unwrap(), dec!(500), "{fault:?}");
            assert_eq!(ledger.history(&number).unwrap().len(), 1, "{fault:?}");
        }
        // the lock is gone, so the account is usable again
        ledger.withdraw(&number, dec!(200)).unwrap();
        assert_eq!(ledger.get_balance(&number).unwrap(), dec!(300));
    }
}
