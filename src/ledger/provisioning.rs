use std::{thread, time::Instant};

use tracing::{info_span, warn};

use crate::{
    account::{Account, CustomerId, IdentityType, NewAccount, NewCustomer, NewIdentity},
    command::CreateAccountRequest,
    number::NumberGenerator,
    storage::{AccountStore, CustomerStore, IdentityStore, Storage, StorageError, UniqueKey},
};

use super::{Existing, Ledger, LedgerError, log_outcome};

/// Identity documents accepted at registration.
const IDENTITY_TYPE: IdentityType = IdentityType::Nik;

/// Account number allocation. Only a collision on the account number moves
/// to the next attempt; any other failure ends the allocation immediately.
#[derive(Debug, PartialEq, Eq)]
enum Allocation {
    Attempting(u32),
    Succeeded(Account),
    Exhausted(StorageError),
}

fn is_collision(err: &StorageError) -> bool {
    match err {
        StorageError::UniqueViolation(UniqueKey::AccountNumber) => true,
        StorageError::UniqueViolation(UniqueKey::PhoneNumber | UniqueKey::Identity)
        | StorageError::Backend(_) => false,
    }
}

impl Allocation {
    fn after_insert(
        attempt: u32,
        max_attempts: u32,
        inserted: Result<Account, StorageError>,
    ) -> Result<Self, StorageError> {
        match inserted {
            Ok(account) => Ok(Self::Succeeded(account)),
            Err(err) if !is_collision(&err) => Err(err),
            Err(_) if attempt < max_attempts => Ok(Self::Attempting(attempt + 1)),
            Err(err) => Ok(Self::Exhausted(err)),
        }
    }
}

impl<S: Storage, G: NumberGenerator> Ledger<S, G> {
    /// Validates the registration details and opens an account, returning
    /// its number.
    pub fn open_account(
        &self,
        fullname: &str,
        phone_number: &str,
        identity_number: &str,
    ) -> Result<String, LedgerError> {
        let request = CreateAccountRequest::new(fullname, phone_number, identity_number)?;
        Ok(self.create_account(&request)?.account_number)
    }

    /// Registers a customer with their identity and opens a saving account
    /// for them, all in one atomic unit.
    pub fn create_account(&self, request: &CreateAccountRequest) -> Result<Account, LedgerError> {
        self.traced(|| {
            let _span = info_span!(
                "create_account",
                phone_number = request.phone_number(),
                identity_number = request.identity_number()
            )
            .entered();
            let started = Instant::now();
            log_outcome("create_account", started, self.provision(request))
        })
    }

    fn provision(&self, request: &CreateAccountRequest) -> Result<Account, LedgerError> {
        // early exit only, the unique indexes below are what decides
        self.ensure_unregistered(request)?;

        self.storage.run_atomic(|unit| {
            let customer = unit.insert_customer(NewCustomer {
                fullname: request.fullname().to_owned(),
                phone_number: request.phone_number().to_owned(),
            })?;
            unit.insert_identity(NewIdentity {
                customer_id: customer.id,
                identity_type: IDENTITY_TYPE,
                identity_number: request.identity_number().to_owned(),
            })?;
            self.allocate_account(unit, customer.id)
        })
    }

    fn ensure_unregistered(&self, request: &CreateAccountRequest) -> Result<(), LedgerError> {
        self.storage.read_only(|unit| {
            if unit.find_customer_by_phone(request.phone_number())?.is_some() {
                return Err(LedgerError::AlreadyExists(Existing::Phone));
            }
            if unit
                .find_identity(IDENTITY_TYPE, request.identity_number())?
                .is_some()
            {
                return Err(LedgerError::AlreadyExists(Existing::Identity));
            }
            Ok(())
        })
    }

    fn allocate_account<U: AccountStore>(
        &self,
        unit: &mut U,
        customer_id: CustomerId,
    ) -> Result<Account, LedgerError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut state = Allocation::Attempting(1);
        loop {
            state = match state {
                Allocation::Attempting(attempt) => {
                    // a fresh number every attempt, never the one that collided
                    let number = self
                        .generator
                        .generate(self.config.account_number_length)?;
                    let inserted = unit.insert_account(NewAccount::saving(customer_id, number.clone()));
                    let next = Allocation::after_insert(attempt, max_attempts, inserted)?;
                    if let Allocation::Attempting(_) = next {
                        warn!(attempt, account_number = %number, "Account number taken, retrying");
                        thread::sleep(self.config.retry_delay * attempt);
                    }
                    next
                }
                Allocation::Succeeded(account) => return Ok(account),
                Allocation::Exhausted(source) => {
                    return Err(LedgerError::ProvisioningExhausted {
                        attempts: max_attempts,
                        source,
                    });
                }
            }
        }
    }
}
