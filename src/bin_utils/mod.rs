use std::{
    collections::HashMap,
    env,
    io::{Read, Write},
    str::FromStr,
    time::Duration,
};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{Dispatch, info};

use crate::{
    ledger::{Ledger, LedgerConfig, LedgerError},
    number::NumberGenerator,
    storage::{Storage, in_memory::InMemoryStorage},
};
use csv_parser::{CsvOperationParser, Operation, OperationKind};
use csv_printer::{BalanceRow, print_balances};

pub mod csv_parser;
pub mod csv_printer;

#[derive(Debug, Error)]
pub enum RowError {
    #[error("Malformed row: {0}")]
    Malformed(#[from] csv::Error),
    #[error("`{0}` is required for this operation")]
    MissingField(&'static str),
    #[error("Reference `{0}` is already bound to an account")]
    DuplicateReference(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Labels given to accounts opened during a run, in opening order.
#[derive(Debug, Default)]
struct References {
    order: Vec<String>,
    numbers: HashMap<String, String>,
}

impl References {
    fn bind(&mut self, reference: String, account_number: String) {
        self.order.push(reference.clone());
        self.numbers.insert(reference, account_number);
    }

    /// Unknown labels are taken to be account numbers.
    fn resolve<'a>(&'a self, reference: &'a str) -> &'a str {
        self.numbers
            .get(reference)
            .map(String::as_str)
            .unwrap_or(reference)
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order
            .iter()
            .map(|r| (r.as_str(), self.numbers[r].as_str()))
    }
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, RowError> {
    value.ok_or(RowError::MissingField(field))
}

fn apply<S, G>(
    ledger: &Ledger<S, G>,
    references: &mut References,
    op: Operation,
) -> Result<(), RowError>
where
    S: Storage,
    G: NumberGenerator,
{
    match op.kind {
        OperationKind::Open => {
            if references.numbers.contains_key(&op.reference) {
                return Err(RowError::DuplicateReference(op.reference));
            }
            let number = ledger.open_account(
                &required(op.fullname, "fullname")?,
                &required(op.phone, "phone")?,
                &required(op.identity, "identity")?,
            )?;
            references.bind(op.reference, number);
        }
        OperationKind::Deposit => {
            let amount = required(op.amount, "amount")?;
            ledger.deposit(references.resolve(&op.reference), amount)?;
        }
        OperationKind::Withdraw => {
            let amount = required(op.amount, "amount")?;
            ledger.withdraw(references.resolve(&op.reference), amount)?;
        }
        OperationKind::Balance => {
            let balance = ledger.get_balance(references.resolve(&op.reference))?;
            info!(reference = %op.reference, %balance, "Balance");
        }
    }
    Ok(())
}

/// Reads an optional override from the environment.
fn env_override<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value `{raw}` for {name}")),
        Err(_) => Ok(None),
    }
}

/// Default configuration with `LEDGER_MAX_ATTEMPTS` and
/// `LEDGER_RETRY_DELAY_MS` applied.
pub fn config_from_env() -> Result<LedgerConfig> {
    let mut config = LedgerConfig::default();
    if let Some(max_attempts) = env_override("LEDGER_MAX_ATTEMPTS")? {
        config.max_attempts = max_attempts;
    }
    if let Some(delay_ms) = env_override("LEDGER_RETRY_DELAY_MS")? {
        config.retry_delay = Duration::from_millis(delay_ms);
    }
    Ok(config)
}

pub struct Service<'w, R, W: 'w> {
    pub input: R,
    pub output: &'w mut W,
    pub config: LedgerConfig,
    pub dispatch: Dispatch,
    pub error_printer: Box<dyn FnMut(u64, RowError)>,
}

impl<'w, R, W> Service<'w, R, W>
where
    R: Read,
    W: Write + 'w,
{
    pub fn run(mut self) -> Result<()> {
        let parser = CsvOperationParser::new(self.input);
        let ledger = Ledger::new(InMemoryStorage::new(), self.config).with_dispatch(self.dispatch);
        let mut references = References::default();

        for (line, row) in parser {
            let applied = row
                .map_err(RowError::from)
                .and_then(|op| apply(&ledger, &mut references, op));
            if let Err(err) = applied {
                (self.error_printer)(line, err);
            }
        }

        let rows = references
            .iter()
            .map(|(reference, account)| {
                let balance = ledger
                    .get_balance(account)
                    .with_context(|| format!("Failed to read the balance of `{reference}`"))?;
                Ok(BalanceRow {
                    reference: reference.to_owned(),
                    account: account.to_owned(),
                    balance,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        print_balances(self.output, &rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_fall_back_to_literal_numbers() {
        let mut references = References::default();
        references.bind("jane".to_string(), "1234567890".to_string());
        assert_eq!(references.resolve("jane"), "1234567890");
        assert_eq!(references.resolve("9999999999"), "9999999999");
        assert_eq!(
            references.iter().collect::<Vec<_>>(),
            vec![("jane", "1234567890")]
        );
    }

    #[test]
    fn missing_fields_are_reported() {
        let ledger = Ledger::new(InMemoryStorage::new(), LedgerConfig::default());
        let mut references = References::default();
        let op = Operation {
            kind: OperationKind::Open,
            reference: "jane".to_string(),
            amount: None,
            fullname: Some("Jane Doe".to_string()),
            phone: None,
            identity: Some("3204081901970001".to_string()),
        };
        let err = apply(&ledger, &mut references, op).unwrap_err();
        assert!(matches!(err, RowError::MissingField("phone")));
    }
}
