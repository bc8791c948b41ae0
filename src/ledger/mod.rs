use std::{fmt, time::Duration, time::Instant};

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::{Dispatch, dispatcher, error, info, warn};

use crate::{
    account::AccountError,
    command::CommandError,
    number::{GenerationError, NumberGenerator, SecureDigits},
    storage::{Storage, StorageError, UniqueKey},
};

pub mod balance;
pub mod provisioning;

/// Which registration detail is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existing {
    Phone,
    Identity,
}

impl fmt::Display for Existing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Existing::Phone => f.write_str("phone number"),
            Existing::Identity => f.write_str("identity number"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("A customer with this {0} is already registered")]
    AlreadyExists(Existing),
    #[error("Account not found")]
    AccountNotFound,
    #[error("Insufficient balance: {balance} available, {requested} requested")]
    InsufficientBalance { balance: Decimal, requested: Decimal },
    #[error(transparent)]
    Account(AccountError),
    #[error("No free account number after {attempts} attempts")]
    ProvisioningExhausted {
        attempts: u32,
        #[source]
        source: StorageError,
    },
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Storage(StorageError),
}

impl LedgerError {
    /// Errors caused by the request itself rather than by the system. These
    /// are actionable for the caller and are never retried.
    pub fn is_domain(&self) -> bool {
        match self {
            LedgerError::Command(_)
            | LedgerError::AlreadyExists(_)
            | LedgerError::AccountNotFound
            | LedgerError::InsufficientBalance { .. }
            | LedgerError::Account(_) => true,
            LedgerError::ProvisioningExhausted { .. }
            | LedgerError::Generation(_)
            | LedgerError::Storage(_) => false,
        }
    }
}

impl From<StorageError> for LedgerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::UniqueViolation(UniqueKey::PhoneNumber) => {
                LedgerError::AlreadyExists(Existing::Phone)
            }
            StorageError::UniqueViolation(UniqueKey::Identity) => {
                LedgerError::AlreadyExists(Existing::Identity)
            }
            StorageError::UniqueViolation(UniqueKey::AccountNumber) | StorageError::Backend(_) => {
                LedgerError::Storage(err)
            }
        }
    }
}

impl From<AccountError> for LedgerError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::InsufficientBalance { balance, requested } => {
                LedgerError::InsufficientBalance { balance, requested }
            }
            AccountError::NonPositiveAmount(_) | AccountError::InexactResult { .. } => {
                LedgerError::Account(err)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Digits in a generated account number.
    pub account_number_length: usize,
    /// Account number allocations tried before giving up. 0 counts as 1.
    pub max_attempts: u32,
    /// Delay after the n-th collision is `retry_delay * n`.
    #[serde(rename = "retry_delay_ms", deserialize_with = "millis")]
    pub retry_delay: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            account_number_length: 10,
            max_attempts: 3,
            retry_delay: Duration::from_millis(10),
        }
    }
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

/// Entry point of the ledger core: account provisioning, balance mutation
/// and balance reads over a [`Storage`] gateway.
///
/// Every operation is logged through the [`Dispatch`] handed to
/// [`Ledger::with_dispatch`]. Without one the ledger stays silent; it never
/// reads the global or thread-local subscriber.
pub struct Ledger<S, G = SecureDigits> {
    storage: S,
    generator: G,
    config: LedgerConfig,
    dispatch: Dispatch,
}

impl<S: Storage> Ledger<S> {
    pub fn new(storage: S, config: LedgerConfig) -> Self {
        Self::with_generator(storage, SecureDigits, config)
    }
}

impl<S: Storage, G: NumberGenerator> Ledger<S, G> {
    pub fn with_generator(storage: S, generator: G, config: LedgerConfig) -> Self {
        Self {
            storage,
            generator,
            config,
            dispatch: Dispatch::none(),
        }
    }

    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    fn traced<T>(&self, f: impl FnOnce() -> T) -> T {
        dispatcher::with_default(&self.dispatch, f)
    }
}

fn log_outcome<T>(
    operation: &'static str,
    started: Instant,
    result: Result<T, LedgerError>,
) -> Result<T, LedgerError> {
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    match &result {
        Ok(_) => info!(elapsed_ms, "{operation} succeeded"),
        Err(err) if err.is_domain() => warn!(elapsed_ms, error = %err, "{operation} rejected"),
        Err(err) => error!(elapsed_ms, error = %err, "{operation} failed"),
    }
    result
}
