/// Customers, identities, accounts and ledger entries, plus the balance
/// rules that turn a request into an entry.
pub mod account;

/// Validated requests, checked before any storage access.
pub mod command;

/// Account number generation.
pub mod number;

/// Storage gateway contract: per-table capabilities bundled into atomic
/// units, plus an in-memory implementation.
///
/// The ledger only talks to these traits, so a relational backend can be
/// plugged in without touching the engines.
pub mod storage;

/// Account provisioning, deposits, withdrawals and balance reads.
pub mod ledger;

/// Bootstraps the ledger for the binary: replays a CSV of operations and
/// prints the resulting balances. Lives in the library so integration tests
/// can drive it.
pub mod bin_utils;

pub use ledger::{Existing, Ledger, LedgerConfig, LedgerError};
