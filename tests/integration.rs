use std::{cell::RefCell, rc::Rc, str::from_utf8};

use account_ledger::{
    LedgerConfig, LedgerError,
    bin_utils::{RowError, Service},
};
use tracing::Dispatch;

const TEST_FILE: &str = include_str!("operations.csv");

fn run(input: &str) -> (Vec<String>, Vec<RowError>) {
    let errors = Rc::new(RefCell::new(Vec::new()));
    let mut output = Vec::new();
    let service = Service {
        input: input.as_bytes(),
        output: &mut output,
        config: LedgerConfig::default(),
        dispatch: Dispatch::none(),
        error_printer: Box::new({
            let errors = Rc::clone(&errors);
            move |_line, err| errors.borrow_mut().push(err)
        }),
    };
    service.run().unwrap();

    let lines = from_utf8(&output)
        .unwrap()
        .lines()
        .map(ToOwned::to_owned)
        .collect();
    let errors = errors.take();
    (lines, errors)
}

fn split(line: &str) -> (&str, &str, &str) {
    let mut fields = line.split(',');
    let (Some(reference), Some(account), Some(balance), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        panic!("unexpected output line `{line}`");
    };
    (reference, account, balance)
}

#[test]
fn process_operations() {
    let (lines, errors) = run(TEST_FILE);

    // account numbers are random, so only their shape is checked
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "ref,account,balance");
    let (jane_ref, jane_account, jane_balance) = split(&lines[1]);
    let (john_ref, john_account, john_balance) = split(&lines[2]);
    assert_eq!((jane_ref, jane_balance), ("jane", "30000"));
    assert_eq!((john_ref, john_balance), ("john", "1000.25"));
    for account in [jane_account, john_account] {
        assert_eq!(account.len(), 10);
        assert!(account.bytes().all(|b| b.is_ascii_digit()));
    }
    assert_ne!(jane_account, john_account);

    assert_eq!(errors.len(), 4);
    assert!(matches!(
        errors[0],
        RowError::Ledger(LedgerError::InsufficientBalance { .. })
    ));
    assert!(matches!(
        errors[1],
        RowError::Ledger(LedgerError::AlreadyExists(_))
    ));
    assert!(matches!(
        errors[2],
        RowError::Ledger(LedgerError::AccountNotFound)
    ));
    assert!(matches!(errors[3], RowError::Malformed(_)));
}

#[test]
fn rows_missing_fields_or_reusing_labels_are_reported() {
    let (lines, errors) = run("type,ref,amount,fullname,phone,identity\n\
                               open,jane,,Jane Doe,+628123456789,3204081901970001\n\
                               open,jane,,John Doe,+628987654321,3204081901970002\n\
                               deposit,jane\n\
                               open,john,,John Doe\n");
    assert_eq!(lines.len(), 2);
    assert!(lines[1].ends_with(",0"));
    assert!(matches!(
        errors.as_slice(),
        [
            RowError::DuplicateReference(_),
            RowError::MissingField("amount"),
            RowError::MissingField("phone"),
        ]
    ));
}

#[test]
fn validation_failures_do_not_stop_the_run() {
    let (lines, errors) = run("type,ref,amount,fullname,phone,identity\n\
                               open,jane,,J,+628123456789,3204081901970001\n\
                               open,john,,John Doe,+628987654321,3204081901970002\n\
                               deposit,john,-1\n\
                               deposit,john,1000000000\n\
                               deposit,john,999999999.99\n");
    assert_eq!(lines.len(), 2);
    assert!(lines[1].starts_with("john,"));
    assert!(lines[1].ends_with(",999999999.99"));
    assert_eq!(errors.len(), 3);
    assert!(errors.iter().all(|err| matches!(
        err,
        RowError::Ledger(err) if err.is_domain()
    )));
}
