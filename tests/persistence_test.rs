#![cfg(feature = "storage-rocksdb")]

use assert_cmd::cargo_bin;
use std::io::Write;
use std::process::Command;
use tempfile::tempdir;

mod common;

#[test]
fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");
    let accounts = dir.path().join("accounts.csv");
    common::write_accounts_csv(&accounts, &[(1, 100), (2, 0)]).unwrap();

    // 1. First run: open accounts and move 40 points
    let mut csv1 = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv1, "token, from, to, amount, note").unwrap();
    writeln!(csv1, "run-1, 1, 2, 40,").unwrap();

    let output1 = Command::new(cargo_bin!("loyalty-transfer"))
        .arg(csv1.path())
        .arg("--accounts")
        .arg(&accounts)
        .arg("--db-path")
        .arg(&db_path)
        .output()
        .expect("Failed to execute command");
    assert!(output1.status.success());
    let stdout1 = String::from_utf8_lossy(&output1.stdout);
    assert!(stdout1.contains("1,60"));
    assert!(stdout1.contains("2,40"));

    // 2. Second run: same accounts file is skipped, the replayed token is a
    // no-op and the new one applies on top of the recovered balances.
    let mut csv2 = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv2, "token, from, to, amount, note").unwrap();
    writeln!(csv2, "run-1, 1, 2, 40,").unwrap();
    writeln!(csv2, "run-2, 2, 1, 10,").unwrap();

    let output2 = Command::new(cargo_bin!("loyalty-transfer"))
        .arg(csv2.path())
        .arg("--accounts")
        .arg(&accounts)
        .arg("--db-path")
        .arg(&db_path)
        .output()
        .expect("Failed to execute command");
    assert!(output2.status.success());
    let stdout2 = String::from_utf8_lossy(&output2.stdout);
    assert!(stdout2.contains("1,70"));
    assert!(stdout2.contains("2,30"));
}
