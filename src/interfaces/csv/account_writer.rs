use crate::domain::account::{Account, AccountId, Balance};
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct AccountRow {
    account: AccountId,
    balance: Balance,
}

/// Writes final account balances as CSV (`account,balance`).
pub struct AccountWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> AccountWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_accounts(&mut self, accounts: impl IntoIterator<Item = Account>) -> Result<()> {
        for account in accounts {
            self.writer.serialize(AccountRow {
                account: account.id,
                balance: account.balance,
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
