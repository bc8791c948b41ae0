use std::io::Read;

use csv::{DeserializeRecordsIntoIter, Trim};
use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Open,
    Deposit,
    Withdraw,
    Balance,
}

#[derive(Debug, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub kind: OperationKind,
    /// Label bound by `open`, or a literal account number.
    #[serde(rename = "ref")]
    pub reference: String,
    pub amount: Option<Decimal>,
    pub fullname: Option<String>,
    pub phone: Option<String>,
    pub identity: Option<String>,
}

/// Parses an operation list in CSV format. Rows that cannot be parsed are
/// yielded as errors together with their line number.
pub struct CsvOperationParser<R> {
    iter: DeserializeRecordsIntoIter<R, Operation>,
}

impl<R> CsvOperationParser<R>
where
    R: Read,
{
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(source);

        Self {
            iter: reader.into_deserialize(),
        }
    }
}

impl<R> Iterator for CsvOperationParser<R>
where
    R: Read,
{
    type Item = (u64, Result<Operation, csv::Error>);

    fn next(&mut self) -> Option<Self::Item> {
        let curr_line = self.iter.reader().position().line();
        self.iter.next().map(|row| (curr_line, row))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn parses_short_and_full_rows() {
        let input = "type, ref, amount, fullname, phone, identity\n\
                     open, jane, , Jane Doe, +628123456789, 3204081901970001\n\
                     deposit, jane, 50000\n\
                     balance, 1234567890\n\
                     refund, jane, 1\n";
        let rows: Vec<_> = CsvOperationParser::new(input.as_bytes()).collect();
        assert_eq!(rows.len(), 4);

        let open = rows[0].1.as_ref().unwrap();
        assert_eq!(open.kind, OperationKind::Open);
        assert_eq!(open.amount, None);
        assert_eq!(open.fullname.as_deref(), Some("Jane Doe"));
        assert_eq!(open.identity.as_deref(), Some("3204081901970001"));

        let deposit = rows[1].1.as_ref().unwrap();
        assert_eq!(deposit.kind, OperationKind::Deposit);
        assert_eq!(deposit.amount, Some(dec!(50000)));
        assert_eq!(deposit.phone, None);

        let balance = rows[2].1.as_ref().unwrap();
        assert_eq!(balance.reference, "1234567890");

        assert!(rows[3].1.is_err());
    }
}
