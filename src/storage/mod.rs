use thiserror::Error;

use crate::account::{
    Account, AccountId, AccountType, Customer, Identity, IdentityType, NewAccount, NewCustomer,
    NewIdentity, NewTransaction, Transaction,
};

pub mod in_memory;

/// Uniqueness constraints enforced by the storage layer at insert time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueKey {
    /// `(account_type, account_number)`
    AccountNumber,
    PhoneNumber,
    /// `(identity_type, identity_number)`
    Identity,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Unique constraint violated on {0:?}")]
    UniqueViolation(UniqueKey),
    #[error("Storage backend failure: {0}")]
    Backend(String),
}

pub trait AccountStore {
    fn insert_account(&mut self, account: NewAccount) -> Result<Account, StorageError>;

    /// Plain read, never blocks on other units.
    fn read_account(
        &mut self,
        account_type: AccountType,
        account_number: &str,
    ) -> Result<Option<Account>, StorageError>;

    /// Reads the row and holds an exclusive lock on it until the unit ends.
    /// Blocks while another unit holds the lock.
    fn read_account_for_update(
        &mut self,
        account_type: AccountType,
        account_number: &str,
    ) -> Result<Option<Account>, StorageError>;

    fn update_account(&mut self, account: &Account) -> Result<Account, StorageError>;
}

pub trait CustomerStore {
    fn insert_customer(&mut self, customer: NewCustomer) -> Result<Customer, StorageError>;

    fn find_customer_by_phone(&mut self, phone_number: &str)
    -> Result<Option<Customer>, StorageError>;
}

pub trait IdentityStore {
    fn insert_identity(&mut self, identity: NewIdentity) -> Result<Identity, StorageError>;

    fn find_identity(
        &mut self,
        identity_type: IdentityType,
        identity_number: &str,
    ) -> Result<Option<Identity>, StorageError>;
}

pub trait TransactionStore {
    fn insert_transaction(&mut self, entry: NewTransaction) -> Result<Transaction, StorageError>;

    /// Entries of one account, oldest first.
    fn transactions_for_account(
        &mut self,
        account_id: AccountId,
    ) -> Result<Vec<Transaction>, StorageError>;
}

/// All-or-nothing group of reads and writes. Dropping a unit without
/// committing it rolls it back and releases every lock it holds.
pub trait AtomicUnit: AccountStore + CustomerStore + IdentityStore + TransactionStore {
    fn commit(self) -> Result<(), StorageError>;
}

/// Entry point of the storage gateway.
///
/// Implementations must be correct across processes, so uniqueness and row
/// locks live in the backend rather than in the callers.
pub trait Storage: Send + Sync {
    type Unit<'s>: AtomicUnit
    where
        Self: 's;

    fn begin(&self) -> Result<Self::Unit<'_>, StorageError>;

    /// Runs `f` in a fresh unit, committing on `Ok` and rolling back on `Err`.
    fn run_atomic<'s, T, E, F>(&'s self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self::Unit<'s>) -> Result<T, E>,
        E: From<StorageError>,
    {
        let mut unit = self.begin()?;
        let value = f(&mut unit)?;
        unit.commit()?;
        Ok(value)
    }

    /// Runs `f` in a unit that is never committed.
    fn read_only<'s, T, E, F>(&'s self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self::Unit<'s>) -> Result<T, E>,
        E: From<StorageError>,
    {
        let mut unit = self.begin()?;
        f(&mut unit)
    }
}
