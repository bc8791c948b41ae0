use std::{fs::File, io};

use account_ledger::bin_utils::{RowError, Service, config_from_env};
use anyhow::{Context, Result};
use tracing::Dispatch;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let filename = std::env::args()
        .nth(1)
        .context("Expected a file name as the first argument")?;
    let file = File::open(&filename).with_context(|| format!("Failed to open `{filename}`"))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .finish();

    let service = Service {
        input: file,
        output: &mut io::stdout(),
        config: config_from_env()?,
        dispatch: Dispatch::new(subscriber),
        error_printer: Box::new(|line, err| match err {
            RowError::Ledger(err) if err.is_domain() => {
                eprintln!("Rejected at line {line}: {err}")
            }
            err => eprintln!("Error at line {line}: {err}"),
        }),
    };
    service.run()
}
