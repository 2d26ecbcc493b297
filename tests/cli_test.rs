use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;

mod common;

#[test]
fn test_cli_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!());
    cmd.arg("tests/fixtures/transfers.csv")
        .arg("--accounts")
        .arg("tests/fixtures/accounts.csv");

    // t-1 applies once, the overdraft, self-transfer, unknown account and
    // zero amount rows are all rejected.
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("account,balance"))
        .stdout(predicate::str::contains("1,70"))
        .stdout(predicate::str::contains("2,80"))
        .stdout(predicate::str::contains("3,0"))
        .stderr(predicate::str::contains("INSUFFICIENT_POINTS"));

    Ok(())
}

#[test]
fn test_cli_optimistic_mode() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!());
    cmd.arg("tests/fixtures/transfers.csv")
        .arg("--accounts")
        .arg("tests/fixtures/accounts.csv")
        .arg("--concurrency")
        .arg("optimistic");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("1,70"))
        .stdout(predicate::str::contains("2,80"));

    Ok(())
}

#[test]
fn test_cli_rejects_unknown_mode() {
    Command::new(cargo_bin!())
        .arg("tests/fixtures/transfers.csv")
        .arg("--concurrency")
        .arg("eventual")
        .assert()
        .failure();
}

#[test]
fn test_cli_missing_input_fails() {
    Command::new(cargo_bin!())
        .arg("tests/fixtures/does_not_exist.csv")
        .assert()
        .failure();
}

#[test]
fn test_cli_malformed_rows_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let accounts = dir.path().join("accounts.csv");
    common::write_accounts_csv(&accounts, &[(1, 10), (2, 0)]).unwrap();

    let mut transfers = tempfile::NamedTempFile::new().unwrap();
    writeln!(transfers, "token, from, to, amount, note").unwrap();
    writeln!(transfers, "a, one, 2, 5,").unwrap();
    writeln!(transfers, "b, 1, 2, 4,").unwrap();

    let output = Command::new(cargo_bin!())
        .arg(transfers.path())
        .arg("--accounts")
        .arg(&accounts)
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("1,6"));
    assert!(stdout.contains("2,4"));
}

#[test]
fn test_cli_generated_batch_balances_out() {
    let dir = tempfile::tempdir().unwrap();
    let accounts = dir.path().join("accounts.csv");
    let transfers = dir.path().join("transfers.csv");
    common::write_accounts_csv(&accounts, &[(1, 1), (2, 0)]).unwrap();
    common::generate_transfers_csv(&transfers, 1_000).unwrap();

    let output = Command::new(cargo_bin!())
        .arg(&transfers)
        .arg("--accounts")
        .arg(&accounts)
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("1,1"));
    assert!(stdout.contains("2,0"));
}
