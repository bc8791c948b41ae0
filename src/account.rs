use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

pub type CustomerId = u64;
pub type IdentityId = u64;
pub type AccountId = u64;
pub type TransactionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountType {
    Unspecified,
    Saving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    Unspecified,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Currency {
    Unspecified,
    /// Indonesian Rupiah
    Idr,
}

/// National identity document kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityType {
    Unspecified,
    /// Nomor Induk Kependudukan
    Nik,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Credit,
    Debit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCustomer {
    pub fullname: String,
    pub phone_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    pub id: CustomerId,
    pub fullname: String,
    pub phone_number: String,
    pub created_at: DateTime<Utc>,
}

impl NewCustomer {
    pub fn persist(self, id: CustomerId, now: DateTime<Utc>) -> Customer {
        Customer {
            id,
            fullname: self.fullname,
            phone_number: self.phone_number,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIdentity {
    pub customer_id: CustomerId,
    pub identity_type: IdentityType,
    pub identity_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: IdentityId,
    pub customer_id: CustomerId,
    pub identity_type: IdentityType,
    pub identity_number: String,
    pub created_at: DateTime<Utc>,
}

impl NewIdentity {
    pub fn persist(self, id: IdentityId, now: DateTime<Utc>) -> Identity {
        Identity {
            id,
            customer_id: self.customer_id,
            identity_type: self.identity_type,
            identity_number: self.identity_number,
            created_at: now,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountError {
    #[error("Insufficient balance: {balance} available, {requested} requested")]
    InsufficientBalance { balance: Decimal, requested: Decimal },
    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
    #[error("Moving {balance} by {amount} cannot be represented exactly")]
    InexactResult { balance: Decimal, amount: Decimal },
}

/// An account that has not been written yet. Every account starts empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub customer_id: CustomerId,
    pub account_type: AccountType,
    pub account_number: String,
    pub currency: Currency,
    pub status: AccountStatus,
}

impl NewAccount {
    pub fn saving(customer_id: CustomerId, account_number: String) -> Self {
        Self {
            customer_id,
            account_type: AccountType::Saving,
            account_number,
            currency: Currency::Idr,
            status: AccountStatus::Active,
        }
    }

    pub fn persist(self, id: AccountId, now: DateTime<Utc>) -> Account {
        Account {
            id,
            customer_id: self.customer_id,
            account_type: self.account_type,
            account_number: self.account_number,
            balance: Decimal::ZERO,
            currency: self.currency,
            status: self.status,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Stored account. The balance only moves through [`Account::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub customer_id: CustomerId,
    pub account_type: AccountType,
    pub account_number: String,
    balance: Decimal,
    pub currency: Currency,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    /// Builds the credit entry for `amount` against the current balance.
    pub fn handle_deposit(&self, amount: Decimal) -> Result<NewTransaction, AccountError> {
        if amount <= Decimal::ZERO {
            return Err(AccountError::NonPositiveAmount(amount));
        }
        self.entry(TransactionKind::Credit, amount)
    }

    /// Builds the debit entry for `amount`, refusing to go below zero.
    pub fn handle_withdrawal(&self, amount: Decimal) -> Result<NewTransaction, AccountError> {
        if amount <= Decimal::ZERO {
            return Err(AccountError::NonPositiveAmount(amount));
        }
        if amount > self.balance {
            return Err(AccountError::InsufficientBalance {
                balance: self.balance,
                requested: amount,
            });
        }
        self.entry(TransactionKind::Debit, amount)
    }

    fn entry(&self, kind: TransactionKind, amount: Decimal) -> Result<NewTransaction, AccountError> {
        let final_balance = exact_move(kind, self.balance, amount).ok_or(
            AccountError::InexactResult {
                balance: self.balance,
                amount,
            },
        )?;
        Ok(NewTransaction {
            account_id: self.id,
            kind,
            amount,
            initial_balance: self.balance,
            final_balance,
            currency: self.currency,
        })
    }

    /// Moves the balance to the entry's final balance. The entry is the
    /// source of truth, no validation happens here.
    pub fn apply(&mut self, entry: &NewTransaction) {
        self.balance = entry.final_balance;
    }
}

/// Ledger entry produced by [`Account::handle_deposit`] or
/// [`Account::handle_withdrawal`], waiting to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    account_id: AccountId,
    kind: TransactionKind,
    amount: Decimal,
    initial_balance: Decimal,
    final_balance: Decimal,
    currency: Currency,
}

impl NewTransaction {
    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn final_balance(&self) -> Decimal {
        self.final_balance
    }

    pub fn persist(self, id: TransactionId, now: DateTime<Utc>) -> Transaction {
        Transaction {
            id,
            account_id: self.account_id,
            kind: self.kind,
            amount: self.amount,
            initial_balance: self.initial_balance,
            final_balance: self.final_balance,
            currency: self.currency,
            created_at: now,
        }
    }
}

/// `initial` moved by `amount` in the direction of `kind`. `None` when the
/// result overflows or loses digits.
fn exact_move(kind: TransactionKind, initial: Decimal, amount: Decimal) -> Option<Decimal> {
    let (moved, delta) = match kind {
        TransactionKind::Credit => {
            let moved = initial.checked_add(amount)?;
            (moved, moved.checked_sub(initial)?)
        }
        TransactionKind::Debit => {
            let moved = initial.checked_sub(amount)?;
            (moved, initial.checked_sub(moved)?)
        }
    };
    (delta == amount).then_some(moved)
}

/// Append-only ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub initial_balance: Decimal,
    pub final_balance: Decimal,
    pub currency: Currency,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    fn is_consistent(&self) -> bool {
        self.amount > Decimal::ZERO
            && self.final_balance >= Decimal::ZERO
            && exact_move(self.kind, self.initial_balance, self.amount) == Some(self.final_balance)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("Entry {index} starts at {found}, but the previous entry ended at {expected}")]
    Gap {
        index: usize,
        expected: Decimal,
        found: Decimal,
    },
    #[error("Entry {index} does not add up")]
    Inconsistent { index: usize },
}

/// Replays `entries` (in creation order) from `opening` and returns the
/// resulting balance.
pub fn verify_chain(opening: Decimal, entries: &[Transaction]) -> Result<Decimal, ChainError> {
    entries
        .iter()
        .enumerate()
        .try_fold(opening, |balance, (index, entry)| {
            if entry.initial_balance != balance {
                return Err(ChainError::Gap {
                    index,
                    expected: balance,
                    found: entry.initial_balance,
                });
            }
            if !entry.is_consistent() {
                return Err(ChainError::Inconsistent { index });
            }
            Ok(entry.final_balance)
        })
}
