use std::io::Write;

use anyhow::{Context, Result};
use csv::Writer;
use rust_decimal::Decimal;
use serde::Serialize;

/// Final state of one account opened during a run.
#[derive(Debug, Serialize)]
pub struct BalanceRow {
    #[serde(rename = "ref")]
    pub reference: String,
    pub account: String,
    pub balance: Decimal,
}

pub fn print_balances<W: Write>(output: &mut W, rows: &[BalanceRow]) -> Result<()> {
    let mut writer = Writer::from_writer(output);
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("Failed to print the balance of `{}`", row.reference))?;
    }
    writer.flush().context("Failed to flush balances")
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn prints_header_and_rows_in_order() {
        let rows = [
            BalanceRow {
                reference: "jane".to_string(),
                account: "0123456789".to_string(),
                balance: dec!(30000),
            },
            BalanceRow {
                reference: "john".to_string(),
                account: "9876543210".to_string(),
                balance: dec!(1000.25),
            },
        ];
        let mut output = Vec::new();
        print_balances(&mut output, &rows).unwrap();
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "ref,account,balance\njane,0123456789,30000\njohn,9876543210,1000.25\n"
        );
    }

    #[test]
    fn nothing_opened_prints_nothing() {
        let mut output = Vec::new();
        print_balances(&mut output, &[]).unwrap();
        assert!(output.is_empty());
    }
}
