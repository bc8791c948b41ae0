//! Process-local storage backend with the same visibility, uniqueness and
//! locking behaviour a relational store gives the ledger.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    hash::Hash,
};

use chrono::Utc;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::debug;

use crate::account::{
    Account, AccountId, AccountType, Customer, CustomerId, Identity, IdentityId, IdentityType,
    NewAccount, NewCustomer, NewIdentity, NewTransaction, Transaction, TransactionId,
};

use super::{
    AccountStore, AtomicUnit, CustomerStore, IdentityStore, Storage, StorageError,
    TransactionStore, UniqueKey,
};

type UnitId = u64;

/// One-shot failures, consumed by the next matching operation of any unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    InsertCustomer,
    InsertIdentity,
    InsertAccount,
    InsertTransaction,
    UpdateAccount,
    Commit,
}

/// Unique index entry. Keys inserted by an open unit stay reserved until it
/// ends; a concurrent insert of the same key waits for that outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot<Id> {
    Committed(Id),
    Pending { unit: UnitId, id: Id },
}

impl<Id: Copy> Slot<Id> {
    /// Row id as seen from `unit`: committed rows and its own inserts.
    fn visible_to(&self, unit: UnitId) -> Option<Id> {
        match *self {
            Slot::Committed(id) => Some(id),
            Slot::Pending { unit: owner, id } if owner == unit => Some(id),
            Slot::Pending { .. } => None,
        }
    }
}

#[derive(Debug, Default)]
struct Sequences {
    unit: u64,
    customer: CustomerId,
    identity: IdentityId,
    account: AccountId,
    transaction: TransactionId,
}

fn next(seq: &mut u64) -> u64 {
    *seq += 1;
    *seq
}

#[derive(Debug, Default)]
struct Tables {
    customers: BTreeMap<CustomerId, Customer>,
    identities: BTreeMap<IdentityId, Identity>,
    accounts: BTreeMap<AccountId, Account>,
    transactions: BTreeMap<TransactionId, Transaction>,
    phones: HashMap<String, Slot<CustomerId>>,
    identity_numbers: HashMap<(IdentityType, String), Slot<IdentityId>>,
    account_numbers: HashMap<(AccountType, String), Slot<AccountId>>,
    row_locks: HashMap<AccountId, UnitId>,
    sequences: Sequences,
    faults: HashSet<Fault>,
}

impl Tables {
    fn take_fault(&mut self, fault: Fault) -> Result<(), StorageError> {
        if self.faults.remove(&fault) {
            Err(StorageError::Backend(format!("injected {fault:?} failure")))
        } else {
            Ok(())
        }
    }

    fn phone_index(&mut self) -> &mut HashMap<String, Slot<CustomerId>> {
        &mut self.phones
    }

    fn identity_index(&mut self) -> &mut HashMap<(IdentityType, String), Slot<IdentityId>> {
        &mut self.identity_numbers
    }

    fn account_number_index(&mut self) -> &mut HashMap<(AccountType, String), Slot<AccountId>> {
        &mut self.account_numbers
    }
}

fn release<K: Eq + Hash, Id>(index: &mut HashMap<K, Slot<Id>>, key: &K, unit: UnitId) {
    if matches!(index.get(key), Some(Slot::Pending { unit: owner, .. }) if *owner == unit) {
        index.remove(key);
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStorage {
    tables: Mutex<Tables>,
    unlocked: Condvar,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next matching operation fail with [`StorageError::Backend`].
    pub fn inject_fault(&self, fault: Fault) {
        self.tables.lock().faults.insert(fault);
    }
}

impl Storage for InMemoryStorage {
    type Unit<'s>
        = InMemoryUnit<'s>
    where
        Self: 's;

    fn begin(&self) -> Result<InMemoryUnit<'_>, StorageError> {
        let id = next(&mut self.tables.lock().sequences.unit);
        Ok(InMemoryUnit {
            storage: self,
            id,
            staged: Staged::default(),
            locks: Vec::new(),
            done: false,
        })
    }
}

/// Writes of a unit, invisible to everybody else until commit.
#[derive(Debug, Default)]
struct Staged {
    customers: Vec<Customer>,
    identities: Vec<Identity>,
    // inserted and updated rows
    accounts: BTreeMap<AccountId, Account>,
    transactions: Vec<Transaction>,
}

#[derive(Debug)]
pub struct InMemoryUnit<'s> {
    storage: &'s InMemoryStorage,
    id: UnitId,
    staged: Staged,
    locks: Vec<AccountId>,
    done: bool,
}

impl<'s> InMemoryUnit<'s> {
    fn lock_row(&mut self, tables: &mut MutexGuard<'s, Tables>, account_id: AccountId) {
        loop {
            match tables.row_locks.get(&account_id).copied() {
                Some(holder) if holder == self.id => return,
                Some(holder) => {
                    debug!(unit = self.id, holder, account_id, "Waiting for row lock");
                    self.storage.unlocked.wait(tables);
                }
                None => {
                    tables.row_locks.insert(account_id, self.id);
                    self.locks.push(account_id);
                    return;
                }
            }
        }
    }

    /// Claims `key` for this unit. A key pending in another unit blocks until
    /// that unit commits (violation) or rolls back (claimed here).
    fn reserve<K, Id>(
        &self,
        tables: &mut MutexGuard<'s, Tables>,
        index: fn(&mut Tables) -> &mut HashMap<K, Slot<Id>>,
        key: K,
        id: Id,
        constraint: UniqueKey,
    ) -> Result<(), StorageError>
    where
        K: Eq + Hash,
        Id: Copy,
    {
        loop {
            let pending_owner = index(&mut **tables).get(&key).map(|slot| match *slot {
                Slot::Pending { unit, .. } if unit != self.id => Some(unit),
                Slot::Pending { .. } | Slot::Committed(_) => None,
            });
            match pending_owner {
                None => {
                    index(&mut **tables).insert(key, Slot::Pending { unit: self.id, id });
                    return Ok(());
                }
                Some(Some(owner)) => {
                    debug!(unit = self.id, owner, ?constraint, "Waiting for pending key");
                    self.storage.unlocked.wait(tables);
                }
                Some(None) => return Err(StorageError::UniqueViolation(constraint)),
            }
        }
    }

    fn account_row(&self, tables: &Tables, account_id: AccountId) -> Option<Account> {
        self.staged
            .accounts
            .get(&account_id)
            .or_else(|| tables.accounts.get(&account_id))
            .cloned()
    }

    fn rollback(&mut self) {
        let storage = self.storage;
        let mut tables = storage.tables.lock();
        for customer in &self.staged.customers {
            release(&mut tables.phones, &customer.phone_number, self.id);
        }
        for identity in &self.staged.identities {
            let key = (identity.identity_type, identity.identity_number.clone());
            release(&mut tables.identity_numbers, &key, self.id);
        }
        for account in self.staged.accounts.values() {
            let key = (account.account_type, account.account_number.clone());
            release(&mut tables.account_numbers, &key, self.id);
        }
        for account_id in self.locks.drain(..) {
            tables.row_locks.remove(&account_id);
        }
        drop(tables);
        storage.unlocked.notify_all();
        debug!(unit = self.id, "Unit rolled back");
    }
}

impl AccountStore for InMemoryUnit<'_> {
    fn insert_account(&mut self, account: NewAccount) -> Result<Account, StorageError> {
        let storage = self.storage;
        let mut tables = storage.tables.lock();
        tables.take_fault(Fault::InsertAccount)?;
        let id = next(&mut tables.sequences.account);
        self.reserve(
            &mut tables,
            Tables::account_number_index,
            (account.account_type, account.account_number.clone()),
            id,
            UniqueKey::AccountNumber,
        )?;
        drop(tables);

        let row = account.persist(id, Utc::now());
        self.staged.accounts.insert(id, row.clone());
        Ok(row)
    }

    fn read_account(
        &mut self,
        account_type: AccountType,
        account_number: &str,
    ) -> Result<Option<Account>, StorageError> {
        let tables = self.storage.tables.lock();
        let key = (account_type, account_number.to_owned());
        Ok(tables
            .account_numbers
            .get(&key)
            .and_then(|slot| slot.visible_to(self.id))
            .and_then(|id| self.account_row(&tables, id)))
    }

    fn read_account_for_update(
        &mut self,
        account_type: AccountType,
        account_number: &str,
    ) -> Result<Option<Account>, StorageError> {
        let storage = self.storage;
        let mut tables = storage.tables.lock();
        let key = (account_type, account_number.to_owned());
        let Some(id) = tables
            .account_numbers
            .get(&key)
            .and_then(|slot| slot.visible_to(self.id))
        else {
            return Ok(None);
        };
        self.lock_row(&mut tables, id);
        // read after the lock so the latest committed balance is returned
        Ok(self.account_row(&tables, id))
    }

    fn update_account(&mut self, account: &Account) -> Result<Account, StorageError> {
        let storage = self.storage;
        let mut tables = storage.tables.lock();
        tables.take_fault(Fault::UpdateAccount)?;
        if self.account_row(&tables, account.id).is_none() {
            return Err(StorageError::Backend(format!(
                "account {} does not exist",
                account.id
            )));
        }
        self.lock_row(&mut tables, account.id);
        drop(tables);

        let mut row = account.clone();
        row.touch(Utc::now());
        self.staged.accounts.insert(row.id, row.clone());
        Ok(row)
    }
}

impl CustomerStore for InMemoryUnit<'_> {
    fn insert_customer(&mut self, customer: NewCustomer) -> Result<Customer, StorageError> {
        let storage = self.storage;
        let mut tables = storage.tables.lock();
        tables.take_fault(Fault::InsertCustomer)?;
        let id = next(&mut tables.sequences.customer);
        self.reserve(
            &mut tables,
            Tables::phone_index,
            customer.phone_number.clone(),
            id,
            UniqueKey::PhoneNumber,
        )?;
        drop(tables);

        let row = customer.persist(id, Utc::now());
        self.staged.customers.push(row.clone());
        Ok(row)
    }

    fn find_customer_by_phone(
        &mut self,
        phone_number: &str,
    ) -> Result<Option<Customer>, StorageError> {
        let tables = self.storage.tables.lock();
        let Some(id) = tables
            .phones
            .get(phone_number)
            .and_then(|slot| slot.visible_to(self.id))
        else {
            return Ok(None);
        };
        Ok(self
            .staged
            .customers
            .iter()
            .find(|c| c.id == id)
            .or_else(|| tables.customers.get(&id))
            .cloned())
    }
}

impl IdentityStore for InMemoryUnit<'_> {
    fn insert_identity(&mut self, identity: NewIdentity) -> Result<Identity, StorageError> {
        let storage = self.storage;
        let mut tables = storage.tables.lock();
        tables.take_fault(Fault::InsertIdentity)?;
        let id = next(&mut tables.sequences.identity);
        self.reserve(
            &mut tables,
            Tables::identity_index,
            (identity.identity_type, identity.identity_number.clone()),
            id,
            UniqueKey::Identity,
        )?;
        drop(tables);

        let row = identity.persist(id, Utc::now());
        self.staged.identities.push(row.clone());
        Ok(row)
    }

    fn find_identity(
        &mut self,
        identity_type: IdentityType,
        identity_number: &str,
    ) -> Result<Option<Identity>, StorageError> {
        let tables = self.storage.tables.lock();
        let key = (identity_type, identity_number.to_owned());
        let Some(id) = tables
            .identity_numbers
            .get(&key)
            .and_then(|slot| slot.visible_to(self.id))
        else {
            return Ok(None);
        };
        Ok(self
            .staged
            .identities
            .iter()
            .find(|i| i.id == id)
            .or_else(|| tables.identities.get(&id))
            .cloned())
    }
}

impl TransactionStore for InMemoryUnit<'_> {
    fn insert_transaction(&mut self, entry: NewTransaction) -> Result<Transaction, StorageError> {
        let storage = self.storage;
        let mut tables = storage.tables.lock();
        tables.take_fault(Fault::InsertTransaction)?;
        if self.account_row(&tables, entry.account_id()).is_none() {
            return Err(StorageError::Backend(format!(
                "account {} does not exist",
                entry.account_id()
            )));
        }
        let id = next(&mut tables.sequences.transaction);
        drop(tables);

        let row = entry.persist(id, Utc::now());
        self.staged.transactions.push(row.clone());
        Ok(row)
    }

    fn transactions_for_account(
        &mut self,
        account_id: AccountId,
    ) -> Result<Vec<Transaction>, StorageError> {
        let tables = self.storage.tables.lock();
        let mut entries: Vec<Transaction> = tables
            .transactions
            .values()
            .chain(&self.staged.transactions)
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect();
        entries.sort_by_key(|t| t.id);
        Ok(entries)
    }
}

impl AtomicUnit for InMemoryUnit<'_> {
    fn commit(mut self) -> Result<(), StorageError> {
        let storage = self.storage;
        let mut tables = storage.tables.lock();
        if let Err(err) = tables.take_fault(Fault::Commit) {
            // dropping `self` afterwards rolls the unit back
            drop(tables);
            return Err(err);
        }

        let staged = std::mem::take(&mut self.staged);
        for customer in staged.customers {
            tables
                .phones
                .insert(customer.phone_number.clone(), Slot::Committed(customer.id));
            tables.customers.insert(customer.id, customer);
        }
        for identity in staged.identities {
            let key = (identity.identity_type, identity.identity_number.clone());
            tables.identity_numbers.insert(key, Slot::Committed(identity.id));
            tables.identities.insert(identity.id, identity);
        }
        for (id, account) in staged.accounts {
            let key = (account.account_type, account.account_number.clone());
            tables.account_numbers.insert(key, Slot::Committed(id));
            tables.accounts.insert(id, account);
        }
        for entry in staged.transactions {
            tables.transactions.insert(entry.id, entry);
        }
        for account_id in self.locks.drain(..) {
            tables.row_locks.remove(&account_id);
        }
        self.done = true;
        drop(tables);

        storage.unlocked.notify_all();
        debug!(unit = self.id, "Unit committed");
        Ok(())
    }
}

impl Drop for InMemoryUnit<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.rollback();
        }
    }
}
